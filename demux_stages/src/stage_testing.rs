//! Functions useful for testing the martian stages

use anyhow::Result;
use martian::prelude::*;
use std::path::PathBuf;

/// Create a directory within the rover, run the given stage in
/// that directory and return the stage outputs
pub fn run_stage<S>(
    stage: S,
    args: <S as MartianStage>::StageInputs,
    rover: &MartianRover,
) -> Result<<S as MartianStage>::StageOutputs>
where
    S: MartianStage + Sync,
    <S as MartianStage>::StageInputs: Clone + Send + Sync,
    <S as MartianStage>::ChunkInputs: Clone + Send + Sync,
    <S as MartianStage>::ChunkOutputs: Send + Sync,
{
    let run_dir: PathBuf = rover.make_path(S::stage_name());
    std::fs::create_dir(&run_dir)?;
    let outs = stage.test_run(&run_dir, args)?;
    Ok(outs)
}
