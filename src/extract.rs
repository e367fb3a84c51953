//! Pulling a candidate program out of a model reply, and the prompt that asks
//! a model for one.

use crate::executor::RESULT_VARIABLES;
use crate::table::{DType, Table};

const FENCE: &str = "```";
const SAMPLE_ROWS: usize = 5;

/// The first ```` ```python ```` block, else the first fenced block of any
/// language, else the whole trimmed reply. `None` when nothing is left.
pub fn extract_program(reply: &str) -> Option<String> {
    let blocks = fenced_blocks(reply);
    let chosen = blocks
        .iter()
        .find(|(lang, _)| lang.eq_ignore_ascii_case("python") || lang.eq_ignore_ascii_case("py"))
        .or_else(|| blocks.first())
        .map(|(_, body)| body.trim().to_string())
        .unwrap_or_else(|| reply.trim().to_string());
    if chosen.is_empty() {
        None
    } else {
        Some(chosen)
    }
}

/// (language tag, body) of every closed fence, in order
fn fenced_blocks(reply: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut rest = reply;
    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        let (lang, body_start) = match after_open.find('\n') {
            Some(newline) => (after_open[..newline].trim(), &after_open[newline + 1..]),
            None => break,
        };
        let Some(close) = body_start.find(FENCE) else {
            break;
        };
        blocks.push((lang.to_string(), body_start[..close].to_string()));
        rest = &body_start[close + FENCE.len()..];
    }
    blocks
}

/// Prompt asking a model for a program that answers `question` over the
/// dataset bound as `data_binding`
pub fn analysis_prompt(
    columns: &[(String, DType)],
    sample: &str,
    question: &str,
    data_binding: &str,
) -> String {
    let column_lines: Vec<String> = columns
        .iter()
        .map(|(name, dtype)| format!("{}    {}", name, dtype.name()))
        .collect();
    let result_names: Vec<String> = RESULT_VARIABLES.iter().map(|n| format!("`{}`", n)).collect();
    format!(
        "You are a data analyst assistant. The user loaded a table with these columns:\n\n\
         {columns}\n\n\
         Here are the first rows:\n\n\
         {sample}\n\n\
         The user asked: {question}\n\n\
         Produce a Python-only answer that performs the requested analysis on a pandas DataFrame named `{binding}`.\n\n\
         - Output must contain a single fenced Python code block (```python ... ```).\n\
         - Do NOT include any import statements (assume pd, np and px are available).\n\
         - Use `{binding}` as the variable for the table.\n\
         - Put the final result into one of these variables: {results}.\n\
         - Keep code short and focused (prefer <40 lines).\n\
         - Do NOT use file, network, or system operations (no open(), no subprocess, no os, no sys).\n\
         - If visualization is appropriate, produce a Plotly figure object named `fig`.\n",
        columns = column_lines.join("\n"),
        sample = sample,
        question = question.trim(),
        binding = data_binding,
        results = result_names.join(", "),
    )
}

/// [`analysis_prompt`] with the columns and sample taken from `table`
pub fn prompt_for_table(table: &Table, question: &str, data_binding: &str) -> String {
    let columns: Vec<(String, DType)> = table
        .columns()
        .iter()
        .map(|column| (column.name.clone(), column.dtype()))
        .collect();
    analysis_prompt(&columns, &table.render(SAMPLE_ROWS), question, data_binding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_python_block() {
        let reply = "Here you go:\n```text\nnot code\n```\n```Python\nresult = df['a'].sum()\n```\n";
        assert_eq!(
            extract_program(reply).as_deref(),
            Some("result = df['a'].sum()")
        );
    }

    #[test]
    fn test_falls_back_to_any_block() {
        let reply = "```\nresult = 1\n```";
        assert_eq!(extract_program(reply).as_deref(), Some("result = 1"));
    }

    #[test]
    fn test_falls_back_to_whole_reply() {
        assert_eq!(extract_program("  result = 2 \n").as_deref(), Some("result = 2"));
        assert_eq!(extract_program("   \n"), None);
        assert_eq!(extract_program("```python\n\n```"), None);
    }

    #[test]
    fn test_unclosed_fence_is_ignored() {
        let reply = "```python\nresult = 3";
        assert_eq!(extract_program(reply).as_deref(), Some("```python\nresult = 3"));
    }

    #[test]
    fn test_prompt_mentions_schema_and_rules() {
        let table = Table::from_json_str(r#"[{"region": "North", "sales": 100}]"#).unwrap();
        let prompt = prompt_for_table(&table, "total sales?", "df");
        assert!(prompt.contains("region    object"));
        assert!(prompt.contains("sales    int64"));
        assert!(prompt.contains("total sales?"));
        assert!(prompt.contains("`result`, `df_out`, `fig`, `output`"));
        assert!(prompt.contains("named `df`"));
    }
}
