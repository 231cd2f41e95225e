use inmate_mcp::tool_registry::{tools_by_category, ParamSpec};
use inmate_mcp::{ToolCategory, TOOL_REGISTRY};
use std::fmt::Write as _;

fn category_title(cat: ToolCategory) -> &'static str {
    match cat {
        ToolCategory::Search => "Search",
        ToolCategory::Profile => "Profile",
        ToolCategory::Records => "Records",
    }
}

fn param_type(param: &ParamSpec) -> String {
    match param.kind.schema_type() {
        (ty, Some(format)) => format!("{ty} ({format})"),
        (ty, None) => ty.to_string(),
    }
}

fn main() {
    let mut out = String::new();
    let _ = writeln!(out, "# Tools\n");
    let _ = writeln!(
        out,
        "> Auto-generated from `src/tool_registry.rs`. Do not edit by hand."
    );
    let _ = writeln!(
        out,
        "> Regenerate with: `cargo run --bin gen_tools_doc -- docs/TOOLS.md`.\n"
    );
    let _ = writeln!(
        out,
        "`tools/list` returns all {} tools. Every successful call returns the executed \
         OData actions followed by one data block per backend response; with `--dry-run` \
         only the actions are returned.\n",
        TOOL_REGISTRY.len()
    );

    for &cat in ToolCategory::all() {
        let mut tools: Vec<_> = tools_by_category(cat).collect();
        if tools.is_empty() {
            continue;
        }
        tools.sort_by_key(|t| t.name);

        let _ = writeln!(out, "## {} (`{}`)\n", category_title(cat), cat.as_str());
        let _ = writeln!(out, "{}\n", cat.description());
        for tool in tools {
            let _ = writeln!(out, "### `{}`\n", tool.name);
            let _ = writeln!(out, "{}\n", tool.full_desc);
            let _ = writeln!(out, "| Parameter | Type | Required | Description |");
            let _ = writeln!(out, "|-----------|------|----------|-------------|");
            for param in tool.params {
                let _ = writeln!(
                    out,
                    "| `{}` | {} | {} | {} |",
                    param.name,
                    param_type(param),
                    if param.required { "yes" } else { "no" },
                    param.description
                );
            }
            let _ = writeln!(out, "\nExample: `{}`\n", tool.example);
        }
    }

    let _ = writeln!(out, "## Notes\n");
    let _ = writeln!(
        out,
        "- Text filters match case-insensitively by substring (`contains(tolower(...))`)"
    );
    let _ = writeln!(
        out,
        "- Visit ranges are inclusive; a missing `endDate` means now, a missing `startDate` means the beginning of time"
    );
    let _ = writeln!(
        out,
        "- Resource subscriptions and log notifications require a stateful session"
    );

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        if let Err(err) = std::fs::write(&args[1], out) {
            eprintln!("failed to write {}: {}", args[1], err);
            std::process::exit(1);
        }
    } else {
        print!("{out}");
    }
}
