use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use ngsflow::config::PipelineConfig;
use ngsflow::executor::{DryRunExecutor, Executor, SystemExecutor};
use ngsflow::samples::{SampleEntry, SampleSheet};
use ngsflow::stages::{annotation, gatk, picard, platypus};

/// Variant calling and annotation pipeline stages
#[derive(Parser, Debug)]
#[command(author, version, about = "Run NGS pipeline stages through external tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Annotate a VCF with snpEff
    Snpeff(StageArgs),
    /// Load an annotated VCF into a GEMINI database
    Gemini(StageArgs),
    /// Annotate a VCF with vcfanno
    Vcfanno(StageArgs),
    /// Run GATK DiagnoseTargets on a BAM
    DiagnoseTargets(StageArgs),
    /// Run GATK VariantAnnotator on a VCF
    Annotate(AnnotateArgs),
    /// Hard filter a VCF with GATK VariantFiltration
    Filter(StageArgs),
    /// Mark duplicates in a BAM with Picard
    MarkDuplicates(StageArgs),
    /// Add read groups to a BAM with Picard and index it
    AddReadGroups(StageArgs),
    /// Create indel realignment targets with GATK RealignerTargetCreator
    RealignTargets(StageArgs),
    /// Realign indels with GATK IndelRealigner
    RealignIndels(RealignIndelsArgs),
    /// Recalibrate base qualities with GATK BaseRecalibrator and PrintReads
    Recalibrate(StageArgs),
    /// Call variants with Platypus
    Platypus(StageArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SharedOptions {
    /// Pipeline configuration file (JSON)
    #[arg(short = 'c', long = "config", required = true)]
    pub config: Utf8PathBuf,

    /// Directory the tools run in. Logs and outputs are written here and
    /// relative inputs are resolved against it
    #[arg(short = 'w', long = "workdir", default_value = ".")]
    pub workdir: Utf8PathBuf,

    /// Threads passed to tools that support them. Defaults to the tool's
    /// num_cores setting, then to all CPUs
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Log the commands without running them
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SampleInput {
    /// Sample name used to derive output file names
    #[arg(
        short = 's',
        long = "sample",
        requires = "input",
        required_unless_present = "sample_sheet",
        conflicts_with = "sample_sheet"
    )]
    pub sample: Option<String>,

    /// Input file for the stage (VCF or BAM)
    #[arg(short = 'i', long = "input", requires = "sample")]
    pub input: Option<Utf8PathBuf>,

    /// Tab separated file with one sample per line: sample, input, and an
    /// optional secondary input (BAM for annotate, targets for realign-indels)
    #[arg(long = "sample-sheet")]
    pub sample_sheet: Option<Utf8PathBuf>,
}

/// Arguments for stages taking a single input per sample
#[derive(Args, Debug)]
pub struct StageArgs {
    #[command(flatten)]
    pub input: SampleInput,

    #[command(flatten)]
    pub shared: SharedOptions,
}

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    #[command(flatten)]
    pub input: SampleInput,

    /// BAM the variants were called from
    #[arg(short = 'b', long = "bam", conflicts_with = "sample_sheet")]
    pub bam: Option<Utf8PathBuf>,

    #[command(flatten)]
    pub shared: SharedOptions,
}

#[derive(Args, Debug)]
pub struct RealignIndelsArgs {
    #[command(flatten)]
    pub input: SampleInput,

    /// Interval list from realign-targets
    #[arg(long = "targets", conflicts_with = "sample_sheet")]
    pub targets: Option<Utf8PathBuf>,

    #[command(flatten)]
    pub shared: SharedOptions,
}

impl SampleInput {
    fn sample_sheet(&self, secondary: Option<Utf8PathBuf>) -> Result<SampleSheet> {
        if let Some(ref path) = self.sample_sheet {
            return SampleSheet::from_path(path)
                .wrap_err_with(|| format!("Failed to load sample sheet: {path}"));
        }

        match (&self.sample, &self.input) {
            (Some(sample), Some(input)) => Ok(SampleSheet::single(
                sample.clone(),
                input.clone(),
                secondary,
            )),
            _ => bail!("Either --sample with --input, or --sample-sheet is required"),
        }
    }
}

fn secondary_input<'a>(entry: &'a SampleEntry, flag: &str) -> Result<&'a Utf8Path> {
    entry.secondary_input.as_deref().ok_or_else(|| {
        eyre!(
            "Sample '{}' has no {flag}; pass --{flag} or add a third sample sheet column",
            entry.sample
        )
    })
}

/// Run one stage over every sample, printing the produced artifacts.
fn run_stage<F>(
    shared: &SharedOptions,
    sheet: SampleSheet,
    progress: &MultiProgress,
    stage: F,
) -> Result<()>
where
    F: Fn(&dyn Executor, &PipelineConfig, &SampleEntry) -> Result<Vec<Utf8PathBuf>>,
{
    let config = PipelineConfig::from_path(&shared.config)
        .wrap_err_with(|| format!("Failed to load configuration: {}", shared.config))?;

    let system;
    let dry_run;
    let executor: &dyn Executor = if shared.dry_run {
        dry_run = DryRunExecutor::new();
        &dry_run
    } else {
        std::fs::create_dir_all(&shared.workdir).wrap_err(format!(
            "Failed to create working directory: {}",
            shared.workdir
        ))?;
        system = SystemExecutor::new(shared.workdir.clone()).with_progress(progress.clone());
        &system
    };

    log::info!("Processing {} sample(s)", sheet.len());
    for entry in sheet.iter() {
        let outputs = stage(executor, &config, entry)
            .wrap_err_with(|| format!("Sample '{}' failed", entry.sample))?;
        for output in outputs {
            println!("{output}");
        }
    }

    Ok(())
}

impl StageArgs {
    pub fn run<F>(self, progress: &MultiProgress, stage: F) -> Result<()>
    where
        F: Fn(&dyn Executor, &PipelineConfig, &SampleEntry, &SharedOptions) -> ngsflow::Result<Utf8PathBuf>,
    {
        let sheet = self.input.sample_sheet(None)?;
        let shared = &self.shared;
        run_stage(shared, sheet, progress, |executor, config, entry| {
            Ok(vec![stage(executor, config, entry, shared)?])
        })
    }
}

impl AnnotateArgs {
    pub fn run(self, progress: &MultiProgress) -> Result<()> {
        let sheet = self.input.sample_sheet(self.bam)?;
        let threads = self.shared.threads;
        run_stage(&self.shared, sheet, progress, |executor, config, entry| {
            let bam = secondary_input(entry, "bam")?;
            let vcf = gatk::annotate_vcf(executor, config, &entry.sample, &entry.input, bam, threads)?;
            Ok(vec![vcf])
        })
    }
}

impl RealignIndelsArgs {
    pub fn run(self, progress: &MultiProgress) -> Result<()> {
        let sheet = self.input.sample_sheet(self.targets)?;
        run_stage(&self.shared, sheet, progress, |executor, config, entry| {
            let targets = secondary_input(entry, "targets")?;
            let bam = gatk::realign_indels(executor, config, &entry.sample, &entry.input, targets)?;
            Ok(vec![bam])
        })
    }
}

fn init_logging() -> Result<MultiProgress> {
    use env_logger::Env;

    let logger = env_logger::Builder::from_env(Env::default().default_filter_or("info")).build();
    let level = logger.filter();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    log::set_max_level(level);
    Ok(progress)
}

// Main entry point
pub fn main() -> Result<()> {
    color_eyre::install()?;
    let progress = init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Snpeff(args) => args.run(&progress, |ex, config, entry, _| {
            annotation::snpeff(ex, config, &entry.sample, &entry.input)
        }),
        Commands::Gemini(args) => args.run(&progress, |ex, config, entry, _| {
            annotation::gemini(ex, config, &entry.sample, &entry.input)
        }),
        Commands::Vcfanno(args) => args.run(&progress, |ex, config, entry, _| {
            annotation::vcfanno(ex, config, &entry.sample, &entry.input)
        }),
        Commands::DiagnoseTargets(args) => args.run(&progress, |ex, config, entry, _| {
            gatk::diagnose_targets(ex, config, &entry.sample, &entry.input)
        }),
        Commands::Annotate(args) => args.run(&progress),
        Commands::Filter(args) => args.run(&progress, |ex, config, entry, _| {
            gatk::filter_variants(ex, config, &entry.sample, &entry.input)
        }),
        Commands::MarkDuplicates(args) => args.run(&progress, |ex, config, entry, _| {
            picard::mark_duplicates(ex, config, &entry.sample, &entry.input)
        }),
        Commands::AddReadGroups(args) => args.run(&progress, |ex, config, entry, _| {
            picard::add_or_replace_readgroups(ex, config, &entry.sample, &entry.input)
        }),
        Commands::RealignTargets(args) => args.run(&progress, |ex, config, entry, shared| {
            gatk::realign_target_creator(ex, config, &entry.sample, &entry.input, shared.threads)
        }),
        Commands::RealignIndels(args) => args.run(&progress),
        Commands::Recalibrate(args) => args.run(&progress, |ex, config, entry, shared| {
            gatk::recalibrator(ex, config, &entry.sample, &entry.input, shared.threads)
        }),
        Commands::Platypus(args) => args.run(&progress, |ex, config, entry, shared| {
            platypus::platypus_single(ex, config, &entry.sample, &entry.input, shared.threads)
        }),
    }
}
