/// The conversion step a worker is currently on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Sweeping,
    Converting,
    Writing,
    Checking,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sweeping => write!(f, "Sweeping"),
            Self::Converting => write!(f, "Converting"),
            Self::Writing => write!(f, "Writing"),
            Self::Checking => write!(f, "Checking"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub cell_id: String,
    pub worker_id: usize,
    pub stage: Stage,
}

impl WorkerStatus {
    pub fn new(progress: f32, cell_id: &str, worker_id: usize, stage: Stage) -> Self {
        Self {
            progress,
            cell_id: cell_id.to_string(),
            worker_id,
            stage,
        }
    }
}
