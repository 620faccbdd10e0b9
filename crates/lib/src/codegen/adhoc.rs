//! Turns `adhoc_tool` and `shell_command` targets into codegen producers.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adhoc::run_adhoc_tool;
use crate::codegen::{CodegenError, CodegenInput, CodegenTarget, Generator};
use crate::tree::Tree;

/// Runs the target's tool and contributes its adjusted output tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdhocToolGenerator;

#[async_trait]
impl Generator for AdhocToolGenerator {
  fn name(&self) -> &str {
    "adhoc_tool"
  }

  async fn generate(&self, target: &CodegenTarget, cancel: &CancellationToken) -> Result<Tree, CodegenError> {
    let CodegenInput::AdhocTool(request) = &target.input else {
      return Err(CodegenError::UnsupportedInput {
        generator: self.name().to_string(),
        address: target.address.clone(),
      });
    };

    let result = run_adhoc_tool(request.as_ref().clone(), cancel)
      .await
      .map_err(|source| CodegenError::Adhoc {
        address: target.address.clone(),
        source: Box::new(source),
      })?;
    Ok(result.adjusted_tree)
  }
}
