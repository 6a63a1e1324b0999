//! [`SandboxExecutor`] for [`Sandbox`], the seam the contract engine and the
//! verification pipeline see.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use bulwark_core::error::Result;
use bulwark_core::executor::{CommandOutput, GrepMatch, SandboxExecutor};
use std::path::Path;
use std::time::Duration;

#[async_trait]
impl SandboxExecutor for Sandbox {
    fn root_path(&self) -> &Path {
        self.root()
    }

    fn read_file(&self, path: &str) -> Result<String> {
        self.read(path, None, None)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.exists(path)
    }

    fn grep(&self, pattern: &str, glob: Option<&str>, max_results: usize) -> Result<Vec<GrepMatch>> {
        Sandbox::grep(self, pattern, glob, false, max_results)
    }

    fn find_files(&self, glob: &str) -> Result<Vec<String>> {
        Sandbox::find_files(self, Some(glob), &[])
    }

    async fn run_command(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        Sandbox::run_command(self, command, Some(timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sandbox;
    use bulwark_core::contract::{AcceptanceCriterion, Contract};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_contract_checks_through_the_sandbox() {
        let (dir, sb) = sandbox();
        std::fs::write(dir.path().join("app.py"), "def run(x):\n    return x\n").unwrap();
        let executor: Arc<dyn SandboxExecutor> = Arc::new(sb);

        let mut contract = Contract::new(
            "Add run()",
            vec![
                AcceptanceCriterion::file_exists("app.py"),
                AcceptanceCriterion::function_exists("run").with_target_file("app.py"),
                AcceptanceCriterion::file_contains("app.py", "return x"),
            ],
        );
        assert!(contract.is_fulfilled(executor.as_ref()).await);
        assert!(executor.file_exists("app.py"));
        assert!(!executor.file_exists("../escape"));
    }
}
