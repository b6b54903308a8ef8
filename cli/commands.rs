pub mod bundle;
pub mod flatten;

/// Global flags every command handler needs.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub quiet: bool,
    pub verbose: u8,
}
