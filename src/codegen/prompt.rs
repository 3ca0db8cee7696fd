//! Prompt rendering for generation and verdict calls.

use crate::materialize::ContextFile;
use crate::model::{Module, StepType, Task};

/// System prompt for every generation call.
pub const GENERATION_SYSTEM_PROMPT: &str = r#"You are an expert frontend engineer generating code
for a React + TypeScript + Vite + Tailwind CSS application.

## OUTPUT PROTOCOL
1. Emit every file you create or change as a complete file block:
   <kiln-file path="src/relative/Path.tsx">
   ...full file content...
   </kiln-file>
2. Paths are relative to the project root. Never use absolute paths or "..".
3. Never write into node_modules/, .git/ or .kiln/.
4. Finish with exactly one completion marker:
   <kiln-done status="success"/>
   or, if the task cannot be done:
   <kiln-done status="failure">short reason</kiln-done>
5. Output nothing else that looks like these tags.

## RULES
- Only produce files needed for the current task.
- Keep existing exports that other files import.
- Use Tailwind utility classes for styling. No CSS frameworks besides Tailwind.
- Add any new npm dependency to package.json."#;

/// System prompt for the verdict call.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You verify whether a running web application satisfies
a task's acceptance criteria.
You receive a screenshot of the running preview (when available) and its console output.
Reply with a single JSON object and nothing else:
{"verdict": "WORKING" or "BROKEN",
 "diagnosis": "what is wrong, if broken",
 "notes": "optional improvement ideas"}"#;

/// Everything needed to render a generation prompt.
pub struct PromptInput<'a> {
    pub project_name: &'a str,
    pub module: &'a Module,
    pub task: &'a Task,
    pub context: &'a [ContextFile],
    pub patterns: &'a [String],
    /// Corrective section from the auto-fix loop
    pub corrective: Option<&'a str>,
}

fn step_guidance(step: StepType) -> &'static str {
    match step {
        StepType::Contracts => "Define TypeScript types and interfaces only. No components.",
        StepType::Shell => {
            "Create the base Vite app if missing (package.json, index.html, src/main.tsx, \
             Tailwind setup), the layout, routing with react-router-dom, \
             and a placeholder page per screen."
        }
        StepType::Shared => "Create presentational, reusable components with typed props.",
        StepType::Module => {
            "Implement the feature's components and pages. Reuse shared components and types."
        }
        StepType::Integration => {
            "Connect feature pages to the shell's routes and navigation. Do not rewrite features."
        }
        StepType::Simplify => "Refactor for clarity. Behavior and appearance must not change.",
    }
}

pub fn render_generation_prompt(input: &PromptInput<'_>) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Project: {}\n\n", input.project_name));
    out.push_str(&format!(
        "## MODULE: {} ({})\n{}\n\n",
        input.module.name, input.module.step_type, input.module.description
    ));

    out.push_str("## TASK\n");
    out.push_str(&input.task.description);
    out.push('\n');
    if !input.task.components.is_empty() {
        out.push_str(&format!(
            "Components to produce: {}\n",
            input.task.components.join(", ")
        ));
    }
    out.push_str(&format!("Guidance: {}\n", step_guidance(input.task.step_type)));
    if !input.module.acceptance.is_empty() {
        out.push_str(&format!("Acceptance: {}\n", input.module.acceptance));
    }
    out.push('\n');

    if !input.patterns.is_empty() {
        out.push_str(
            "## PROJECT CONVENTIONS\nFollow these conventions established by earlier tasks:\n",
        );
        for fact in input.patterns {
            out.push_str(&format!("- {}\n", fact));
        }
        out.push('\n');
    }

    if !input.context.is_empty() {
        out.push_str("## EXISTING FILES\n");
        for file in input.context {
            out.push_str(&format!(
                "<existing-file path=\"{}\"{}>\n{}\n</existing-file>\n",
                file.path,
                if file.truncated { " truncated=\"true\"" } else { "" },
                file.content.trim_end()
            ));
        }
        out.push('\n');
    }

    if let Some(corrective) = input.corrective {
        out.push_str(corrective);
        out.push_str("\n\n");
    }

    out.push_str("Respond with file blocks followed by the completion marker.\n");
    out
}

pub fn render_judge_prompt(
    module: &Module,
    task: &Task,
    console: &str,
    has_screenshot: bool,
) -> String {
    let console = if console.trim().is_empty() {
        "(no console output)"
    } else {
        console
    };
    format!(
        "## TASK\n{}\n\n## ACCEPTANCE\n{}\n\n## SCREENSHOT\n{}\n\n\
         ## CONSOLE OUTPUT\n```\n{}\n```\n\n\
         Is the preview WORKING or BROKEN for this task?",
        task.description,
        if module.acceptance.is_empty() {
            &module.description
        } else {
            &module.acceptance
        },
        if has_screenshot {
            "Attached."
        } else {
            "Not available; judge from the console output."
        },
        console.trim_end()
    )
}
