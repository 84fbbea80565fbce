//! hippmapper - hippocampus segmentation from T1-weighted MRI
//!
//! Command-line interface over the segmentation pipeline and its tools.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::bias_corr::BiasCorrCommand;
use commands::group::GroupCommand;
use commands::seg_hipp::SegHippCommand;
use commands::seg_qc::SegQcCommand;
use commands::stats::StatsCommand;
use commands::trim_like::TrimLikeCommand;

#[derive(Parser)]
#[command(
    name = "hippmapper",
    version,
    about = "Hippocampus segmentation from T1-weighted MRI",
    long_about = "Segments the left and right hippocampus of a T1-weighted MRI volume with a\n\
                  coarse-to-fine pair of convolutional networks, and reports the uncertainty\n\
                  of the fine prediction.",
    after_help = "EXAMPLES:\n  \
                  # Segment one subject directory\n  \
                  hippmapper seg-hipp --subj /data/sub01\n\n  \
                  # Segment a T1 volume directly, with Monte-Carlo samples\n  \
                  hippmapper seg-hipp --t1 /data/sub01/sub01_T1.nii.gz --num-mc 20\n\n  \
                  # Segment every subject under a study root, four at a time\n  \
                  hippmapper group --root /data --jobs 4 --report group.json\n\n  \
                  # Summarize hemisphere volumes\n  \
                  hippmapper stats-hp --root /data\n\n\
                  For more details on a specific command:\n  \
                  hippmapper <COMMAND> --help"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment the hippocampus of one subject
    SegHipp(SegHippCommand),

    /// Segment many subjects concurrently
    Group(GroupCommand),

    /// Tabulate hemisphere volumes of finished predictions
    StatsHp(StatsCommand),

    /// Render a QC mosaic of a segmentation over its T1
    SegQc(SegQcCommand),

    /// Correct the bias field of a T1 volume
    BiasCorr(BiasCorrCommand),

    /// Resample an image onto the grid of a reference image
    TrimLike(TrimLikeCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A single-subject run also logs into the subject's directory
    let log_dir = match &cli.command {
        Commands::SegHipp(cmd) => cmd.log_dir(),
        _ => None,
    };
    let _guard = logging::init(cli.verbose, log_dir.as_deref())?;

    match cli.command {
        Commands::SegHipp(cmd) => cmd.execute().await,
        Commands::Group(cmd) => cmd.execute().await,
        Commands::StatsHp(cmd) => cmd.execute().await,
        Commands::SegQc(cmd) => cmd.execute().await,
        Commands::BiasCorr(cmd) => cmd.execute().await,
        Commands::TrimLike(cmd) => cmd.execute().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::PathBuf;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_seg_hipp() {
        let cli = Cli::try_parse_from([
            "hippmapper",
            "seg-hipp",
            "--subj",
            "/data/sub01",
            "--num-mc",
            "8",
            "--force",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::SegHipp(cmd) => {
                assert_eq!(cmd.subj, Some(PathBuf::from("/data/sub01")));
                assert_eq!(cmd.num_mc, Some(8));
                assert!(cmd.force);
                assert!(!cmd.bias);
            }
            _ => panic!("expected seg-hipp"),
        }
    }

    #[test]
    fn test_seg_hipp_requires_one_input() {
        assert!(Cli::try_parse_from(["hippmapper", "seg-hipp"]).is_err());
        assert!(Cli::try_parse_from([
            "hippmapper",
            "seg-hipp",
            "--subj",
            "/data/sub01",
            "--t1",
            "/data/sub01/sub01_T1.nii.gz",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_group_with_backend() {
        let cli = Cli::try_parse_from([
            "hippmapper",
            "group",
            "--root",
            "/data",
            "--jobs",
            "3",
            "--backend",
            "external",
            "--c3d-bin",
            "/opt/c3d/bin",
        ])
        .unwrap();
        match cli.command {
            Commands::Group(cmd) => {
                assert_eq!(cmd.jobs, Some(3));
                assert_eq!(cmd.config.backend, Some(commands::BackendArg::External));
                assert_eq!(cmd.config.c3d_bin, Some(PathBuf::from("/opt/c3d/bin")));
            }
            _ => panic!("expected group"),
        }
    }

    #[test]
    fn test_trim_like_rejects_unknown_interpolation() {
        let args = |order: &'static str| {
            [
                "hippmapper",
                "trim-like",
                "--in",
                "a.nii.gz",
                "--ref",
                "b.nii.gz",
                "--out",
                "c.nii.gz",
                "--interp",
                order,
            ]
        };
        assert!(Cli::try_parse_from(args("1")).is_ok());
        assert!(Cli::try_parse_from(args("2")).is_err());
    }
}
