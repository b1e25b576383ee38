//! Exit codes used by the CLI

/// Command completed successfully
pub const EXIT_SUCCESS: i32 = 0;

/// Command failed (run failure, IO error, unexpected error)
pub const EXIT_ERROR: i32 = 1;

/// The workflow definition failed validation
pub const EXIT_VALIDATION: i32 = 2;
