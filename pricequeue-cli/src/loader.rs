use async_trait::async_trait;
use chrono::NaiveDate;
use pricequeue::{tasks::PriceLoader, task::TaskError};
use tokio::process::Command;
use tracing::instrument;

const ERROR_TYPE: &str = "loader";

/// Loads prices by running an external script.
///
/// The script is called as `<program> <script> --symbol S --start-date D --end-date D` and must
/// print the stored rows as a JSON array.
#[derive(Debug, Clone)]
pub struct ScriptPriceLoader {
    program: String,
    script: String,
}

impl ScriptPriceLoader {
    pub fn new(program: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
        }
    }
}

#[async_trait]
impl PriceLoader for ScriptPriceLoader {
    #[instrument(skip(self))]
    async fn load(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<usize, TaskError> {
        let output = Command::new(&self.program)
            .arg(&self.script)
            .arg("--symbol")
            .arg(symbol)
            .arg("--start-date")
            .arg(start_date.to_string())
            .arg("--end-date")
            .arg(end_date.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                TaskError::new(ERROR_TYPE, format!("Failed to run {}: {error}", self.script))
            })?;

        if !output.status.success() {
            return Err(TaskError::new(
                ERROR_TYPE,
                format!(
                    "{} exited with {}: {}",
                    self.script,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        count_rows(&output.stdout)
    }
}

fn count_rows(stdout: &[u8]) -> Result<usize, TaskError> {
    serde_json::from_slice::<Vec<serde_json::Value>>(stdout)
        .map(|rows| rows.len())
        .map_err(|error| TaskError::new(ERROR_TYPE, format!("Unexpected loader output: {error}")))
}
