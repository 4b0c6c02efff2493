//! `${...}` template resolution for kill-node messages and action configuration.
//!
//! Supported references: plain variables (`${output.dir}`) looked up in instance
//! variables then job configuration, and the workflow functions `wf:id()`,
//! `wf:name()`, `wf:user()`, `wf:lastErrorNode()`, `wf:errorCode(node)` and
//! `wf:errorMessage(node)`. A `node` argument may be a quoted literal or
//! `wf:lastErrorNode()`.

use std::collections::BTreeMap;

use super::error::WorkflowError;

/// Values visible to a template
#[derive(Debug, Default, Clone)]
pub struct TemplateContext<'a> {
    pub job_id: &'a str,
    pub app_name: &'a str,
    pub user: &'a str,
    pub vars: Option<&'a BTreeMap<String, String>>,
    pub conf: Option<&'a BTreeMap<String, String>>,
    pub last_error_node: Option<&'a str>,
    /// node name -> (error code, error message)
    pub node_errors: BTreeMap<String, (String, String)>,
}

impl TemplateContext<'_> {
    fn variable(&self, name: &str) -> Option<String> {
        self.vars
            .and_then(|vars| vars.get(name))
            .or_else(|| self.conf.and_then(|conf| conf.get(name)))
            .cloned()
    }

    fn node_argument(&self, arg: &str) -> Result<String, WorkflowError> {
        let arg = arg.trim();
        if arg == "wf:lastErrorNode()" {
            return Ok(self.last_error_node.unwrap_or_default().to_string());
        }
        let unquoted = arg
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
            .or_else(|| arg.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')));
        unquoted
            .map(str::to_string)
            .ok_or_else(|| WorkflowError::MalformedExpression(arg.to_string()))
    }

    fn evaluate(&self, expr: &str) -> Result<String, WorkflowError> {
        let expr = expr.trim();
        match expr {
            "wf:id()" => return Ok(self.job_id.to_string()),
            "wf:name()" => return Ok(self.app_name.to_string()),
            "wf:user()" => return Ok(self.user.to_string()),
            "wf:lastErrorNode()" => return Ok(self.last_error_node.unwrap_or_default().to_string()),
            _ => {}
        }

        if let Some(arg) = function_argument(expr, "wf:errorCode") {
            let node = self.node_argument(arg)?;
            return Ok(self
                .node_errors
                .get(&node)
                .map(|(code, _)| code.clone())
                .unwrap_or_default());
        }
        if let Some(arg) = function_argument(expr, "wf:errorMessage") {
            let node = self.node_argument(arg)?;
            return Ok(self
                .node_errors
                .get(&node)
                .map(|(_, message)| message.clone())
                .unwrap_or_default());
        }
        if expr.contains('(') || expr.is_empty() {
            return Err(WorkflowError::MalformedExpression(expr.to_string()));
        }

        self.variable(expr)
            .ok_or_else(|| WorkflowError::UnresolvedVariable(expr.to_string()))
    }
}

fn function_argument<'e>(expr: &'e str, function: &str) -> Option<&'e str> {
    expr.strip_prefix(function)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Resolve every `${...}` reference in `template`
pub fn resolve_template(template: &str, ctx: &TemplateContext<'_>) -> Result<String, WorkflowError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = find_closing_brace(after)
            .ok_or_else(|| WorkflowError::MalformedExpression(template.to_string()))?;
        out.push_str(&ctx.evaluate(&after[..close])?);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Position of the `}` closing an expression, skipping quoted sections
fn find_closing_brace(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in s.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '}') => return Some(idx),
            _ => {}
        }
    }
    None
}
