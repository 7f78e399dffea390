//! Shared scenario-test scaffolding: a kernel wired with the mock
//! collaborators, logging to a scratch directory.

use agency_kernel::config::KernelConfig;
use agency_kernel::event_log::LogDestination;
use agency_kernel::world::Kernel;
use agency_sandbox::mock::{MockSandbox, MockScorer};

#[allow(dead_code)]
pub fn test_kernel(dir: &std::path::Path) -> Kernel<MockSandbox> {
    Kernel::build(
        KernelConfig::default(),
        MockSandbox::new(),
        Box::new(MockScorer::new()),
        LogDestination::SingleFile(dir.join("events.jsonl")),
    )
    .unwrap()
}

#[allow(dead_code)]
pub fn test_kernel_with_sandbox(dir: &std::path::Path, sandbox: MockSandbox) -> Kernel<MockSandbox> {
    Kernel::build(
        KernelConfig::default(),
        sandbox,
        Box::new(MockScorer::new()),
        LogDestination::SingleFile(dir.join("events.jsonl")),
    )
    .unwrap()
}
