//! `taskloom tools`: List built-in tools by category.

use taskloom_core::ToolInfo;

use super::runtime::{self, CliResult};

pub async fn run() -> CliResult<()> {
    let config = runtime::load_config()?;
    let registry = runtime::tool_registry(&config)?;

    println!("🔧 {} tool(s)", registry.len());
    for (category, tools) in registry.by_category() {
        println!();
        println!("  {category}");
        for tool in &tools {
            println!("    {}", describe(tool));
        }
    }
    if config.tools.search_corpus.is_none() {
        println!();
        println!("  (set tools.search_corpus to enable `search`)");
    }
    Ok(())
}

fn describe(tool: &ToolInfo) -> String {
    let params: Vec<String> = tool
        .parameters
        .iter()
        .map(|p| {
            if p.required {
                p.name.clone()
            } else {
                format!("{}?", p.name)
            }
        })
        .collect();
    format!("{}({}): {}", tool.name, params.join(", "), tool.description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_core::ToolParameter;

    #[test]
    fn optional_params_are_marked() {
        let info = ToolInfo {
            name: "http_request".into(),
            description: "Make an HTTP request".into(),
            category: "network".into(),
            parameters: vec![
                ToolParameter::required("url", "string", "Target URL"),
                ToolParameter::optional("method", "string", "HTTP method"),
            ],
        };
        assert_eq!(
            describe(&info),
            "http_request(url, method?): Make an HTTP request"
        );
    }
}
