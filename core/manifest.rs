#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    #[default]
    Running,
    Complete,
    Incomplete,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub path: String,
    pub message: String,
}

/// Running counters for one flatten run. Only the thread driving the traversal
/// mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlattenManifest {
    pub total_seen: usize,
    pub included: usize,
    pub excluded_by_rule: usize,
    pub excluded_binary: usize,
    pub errors: Vec<ErrorRecord>,
    pub included_bytes: u64,
    pub status: RunStatus,
}

impl FlattenManifest {
    pub fn record_included(&mut self, size: u64) {
        self.total_seen += 1;
        self.included += 1;
        self.included_bytes += size;
    }

    pub fn record_binary(&mut self) {
        self.total_seen += 1;
        self.excluded_binary += 1;
    }

    pub fn record_excluded(&mut self, is_dir: bool) {
        if !is_dir {
            self.total_seen += 1;
        }
        self.excluded_by_rule += 1;
    }

    /// `counts_as_file` is false for errors about directories (e.g. unreadable listings).
    pub fn record_error(&mut self, path: String, message: String, counts_as_file: bool) {
        if counts_as_file {
            self.total_seen += 1;
        }
        self.errors.push(ErrorRecord { path, message });
    }

    pub fn finalize(&mut self, status: RunStatus) {
        debug_assert_eq!(self.status, RunStatus::Running, "manifest finalized twice");
        self.status = status;
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    /// True when anything was left out of the output.
    pub fn has_exclusions_or_errors(&self) -> bool {
        self.excluded_by_rule > 0 || self.excluded_binary > 0 || !self.errors.is_empty()
    }
}
