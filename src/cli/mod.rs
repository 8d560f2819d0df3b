mod refine;
mod shared;
mod utils;

use camino::Utf8Path;
use clap::Parser;
use simple_error::{SimpleResult, bail};

use self::refine::validate_and_fix_refine_settings;
pub use self::refine::{RefineSettings, write_refine_settings};
use self::shared::validate_and_fix_shared_settings;
pub use self::shared::SharedSettings;

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    after_help = "External tools: minimap2 or ngmlr for alignment, and racon or falcon_sense for
consensus, must be available on the PATH or given with the --*-path options.",
    help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(rename_all = "kebab_case")]
pub struct Settings {
    #[command(flatten)]
    pub shared: SharedSettings,

    #[command(flatten)]
    pub refine: RefineSettings,
}

impl Settings {
    pub fn get_output_dir(&self) -> &Utf8Path {
        &self.refine.output_dir
    }

    /// True if an existing output directory can be used
    pub fn reuse_output_dir(&self) -> bool {
        self.shared.clobber || self.refine.resume
    }
}

/// Checks if a directory does not exist
///
pub fn check_novel_dirname(dirname: &Utf8Path, label: &str) -> SimpleResult<()> {
    if dirname.exists() {
        bail!("{label} already exists: \"{dirname}\"");
    }
    Ok(())
}

/// Validate settings and update parameters that can't be processed by clap
///
fn validate_and_fix_settings_impl(mut settings: Settings) -> SimpleResult<Settings> {
    settings.shared = validate_and_fix_shared_settings(settings.shared)?;
    settings.refine = validate_and_fix_refine_settings(settings.refine)?;
    Ok(settings)
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
pub fn validate_and_fix_settings(settings: Settings) -> Settings {
    match validate_and_fix_settings_impl(settings) {
        Ok(x) => x,
        Err(msg) => {
            eprintln!("Invalid command-line setting: {msg}");
            std::process::exit(exitcode::USAGE);
        }
    }
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}
