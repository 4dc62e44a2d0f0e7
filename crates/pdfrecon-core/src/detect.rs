use crate::model::Finding;

bitflags::bitflags! {
    /// What an evaluator reads, so the runner can prepare shared state once
    /// and skip work no registered evaluator needs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Needs: u32 {
        const OBJECT_GRAPH  = 0b0001;
        const METADATA      = 0b0010;
        const PAGE_CONTENT  = 0b0100;
        const STREAM_DECODE = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Cost {
    Cheap,
    Moderate,
    Expensive,
}

/// One indicator evaluator: a pure function from the scan context to zero or
/// more findings. Evaluator failures are isolated by the runner; an error
/// here is recorded on the report and never aborts the scan.
pub trait Evaluator: Send + Sync {
    fn id(&self) -> &'static str;
    fn needs(&self) -> Needs;
    fn cost(&self) -> Cost;
    fn run(&self, ctx: &crate::scan::ScanContext) -> anyhow::Result<Vec<Finding>>;
}
