use std::sync::Arc;

use crate::agent::LlmAgent;
use crate::config::ToolsConfig;
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;
use crate::tools::WriteToDiskTool;
use crate::workflow::WorkflowNode;

const WRITER_INSTRUCTION: &str = "You write Python code. Based only on the user's request, \
produce code that fulfils it. Reply with a single ```python fenced block and nothing else.";

const REVIEWER_INSTRUCTION: &str = "You review Python code.

Code to review:
```python
{generated_code}
```

List concrete problems with correctness, readability, efficiency, edge cases and \
style as a bulleted list. If the code is fine, reply exactly: No major issues found.";

const REFACTORER_INSTRUCTION: &str = "You refactor Python code using review comments.

Original code:
```python
{generated_code}
```

Review comments:
{review_comments}

Apply the comments. If they say \"No major issues found.\", return the code unchanged. \
Reply with a single ```python fenced block containing the complete final code.";

const FILE_WRITER_INSTRUCTION: &str = "You save code to disk.

Code to save:
```python
{refactored_code}
```

Pick a short project name (e.g. `fibonacci`) and a filename (e.g. `main.py`), then call \
`write_to_disk` with filename `output/<project>/<filename>` and the code without the \
fences. Reply with the full path that was written.";

/// Writer -> reviewer -> refactorer -> file writer.
pub fn code_pipeline(model: Arc<dyn LanguageModel>, tools: &ToolsConfig) -> WorkflowNode {
    let writer = LlmAgent::new("code_writer", model.clone())
        .with_description("Writes initial Python code from a specification.")
        .with_instruction(WRITER_INSTRUCTION)
        .with_output_key("generated_code");

    let reviewer = LlmAgent::new("code_reviewer", model.clone())
        .with_description("Reviews code and lists improvements.")
        .with_instruction(REVIEWER_INSTRUCTION)
        .with_output_key("review_comments");

    let refactorer = LlmAgent::new("code_refactorer", model.clone())
        .with_description("Refactors code based on review comments.")
        .with_instruction(REFACTORER_INSTRUCTION)
        .with_output_key("refactored_code");

    let file_writer = LlmAgent::new("file_writer", model)
        .with_description("Writes the refactored code to a file.")
        .with_instruction(FILE_WRITER_INSTRUCTION)
        .with_tools(
            ToolRegistry::new().with(WriteToDiskTool::rooted_at(tools.output_dir.clone())),
        )
        .with_output_key("saved_path");

    WorkflowNode::sequence(
        "code_pipeline",
        vec![
            WorkflowNode::agent(writer),
            WorkflowNode::agent(reviewer),
            WorkflowNode::agent(refactorer),
            WorkflowNode::agent(file_writer),
        ],
    )
}
