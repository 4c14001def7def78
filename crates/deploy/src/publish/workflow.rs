//! CI workflow redeploying the function from the published repository.

use anyhow::{Context, Result};

use crate::{handler::HANDLER_FILE, provisioner::ProvisionResult, template};

/// Workflow template. `${{ ... }}` expressions are evaluated by the CI runner.
pub const WORKFLOW_TEMPLATE: &str = include_str!("../../assets/deploy-workflow.yml");

/// Location of the workflow in the repository.
pub const WORKFLOW_PATH: &str = ".github/workflows/deploy.yml";

/// Function name segment of a function ARN.
fn function_name(function_arn: &str) -> &str {
    function_arn.rsplit(':').next().unwrap_or(function_arn)
}

/// Render the workflow for a provisioned service.
pub fn render(result: &ProvisionResult, branch: &str) -> Result<String> {
    template::fill(
        WORKFLOW_TEMPLATE,
        &[
            ("function_name", function_name(&result.function_arn)),
            ("branch", branch),
            ("region", result.region.as_str()),
            ("handler_file", HANDLER_FILE),
        ],
    )
    .context("Failed to render deployment workflow")
}
