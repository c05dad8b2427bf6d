/*!
# gpuwatch DevKit - test doubles for the polling engine

Lets the engine run without any real host:
- Scripted executor standing in for ssh + nvidia-smi
- nvidia-smi output and configuration fixtures
- Harness that starts the pollers and waits on host states
*/

pub mod executor_stub;
pub mod fixtures;
pub mod test_utils;

pub use executor_stub::{Call, Gate, ScriptedExecutor, Step};
pub use fixtures::{gpu, smi_output, test_config};
pub use test_utils::{init_test_logging, RecordingRenderer, TestHarness};
