use thiserror::Error;

/// Runtime failure categories.
///
/// Each category carries a fixed handling policy, applied where the
/// orchestrator loop consumes the error:
///
/// * `Transient` - absorbed without logging; the loop continues.
/// * `Validation` - reflected back to the user on the configuration form;
///   no state is mutated.
/// * `Persistence` - logged; the running configuration stays as it was and
///   the attempted values are discarded. No restart.
/// * `Peripheral` - the affected subsystem is disabled for the process
///   lifetime and reads from it yield neutral values.
/// * `Fatal` - aborts startup. Binding the listening socket is the only
///   operation that produces this.
#[derive(Debug, Error)]
pub enum Error {
    /// Expected, bounded I/O waits: accept timeout, empty read, client gone.
    #[error("transient i/o")]
    Transient,

    /// Rejected form input, with the message shown on the form.
    #[error("{0}")]
    Validation(String),

    /// The configuration record could not be written to durable storage.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// A peripheral did not come up or could not be read.
    #[error("peripheral unavailable: {0}")]
    Peripheral(&'static str),

    /// The process cannot continue.
    #[error("fatal: {0}")]
    Fatal(String),
}
