//! snp_demux
#![deny(missing_docs)]

use anyhow::Result;
use clap::Parser;
use demux_stages::local::{run_local, LocalInputs};
use demux_stages::params::load_params;
use martian::prelude::*;
use snp_demux::DemuxParams;
use std::path::PathBuf;

#[derive(Debug, Parser)]
enum Args {
    Martian {
        adapter_args: Vec<String>,
    },
    Mro {
        #[clap(long)]
        file: Option<String>,
        #[clap(long)]
        rewrite: bool,
    },
    /// Demultiplex local files without Martian.
    Run {
        /// Hashtag counts CSV.
        #[clap(long)]
        hto: PathBuf,
        /// SNPs x cells Matrix Market file.
        #[clap(long)]
        snp_matrix: PathBuf,
        /// Barcodes of the SNP matrix columns.
        #[clap(long)]
        snp_barcodes: PathBuf,
        /// SNP ids of the SNP matrix rows.
        #[clap(long)]
        snp_ids: PathBuf,
        /// Parameters TOML file.
        #[clap(long)]
        params: Option<PathBuf>,
        /// Output directory.
        #[clap(long)]
        out: PathBuf,
    },
}

const HEADER: &str = "# Copyright 2023 10x Genomics, Inc. All rights reserved.";

fn main() -> Result<()> {
    let args: Args = Args::parse();

    let (stage_registry, mro_registry) = martian_stages![
        demux_stages::stages::high_conf_calls::HighConfCalls,
        demux_stages::stages::add_snps::AddSnps,
        demux_stages::stages::reassign_cells::ReassignCells,
    ];

    match args {
        Args::Martian { adapter_args } => {
            let adapter = MartianAdapter::new(stage_registry).log_level(LevelFilter::Info);
            let retcode = adapter.run(adapter_args);
            std::process::exit(retcode);
        }
        Args::Mro { file, rewrite } => {
            martian_make_mro(HEADER, file, rewrite, mro_registry)?;
        }
        Args::Run {
            hto,
            snp_matrix,
            snp_barcodes,
            snp_ids,
            params,
            out,
        } => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init();
            let params = match params {
                Some(path) => load_params(&path)?,
                None => DemuxParams::default(),
            };
            let inputs = LocalInputs {
                hto,
                snp_matrix,
                snp_barcodes,
                snp_ids,
            };
            run_local(&inputs, &params, &out)?;
        }
    }

    Ok(())
}
