/// Program name used for logging, output file naming and VCF header records
pub const PROGRAM_NAME: &str = env!("CARGO_PKG_NAME");

/// Program version
///
/// All client code should refer directly to this copy instead of reading the environment
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");
