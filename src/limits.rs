/// Upper bounds on form input. Anything larger is rejected with
/// `EngineError::LimitExceeded` before any expansion work is done.
pub const MAX_TITLE_LEN: usize = 256;

pub const MAX_CLIENT_REF_LEN: usize = 128;

pub const MAX_EXCEPTIONS: usize = 1_000;

/// Inclusive span of a recurrence, in calendar days (~5 years).
pub const MAX_RECURRENCE_DAYS: i64 = 1_830;

/// Most occurrences a single series may materialize locally.
pub const MAX_SERIES_LEN: usize = 1_000;
