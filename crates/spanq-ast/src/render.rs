//! Indented tree rendering for terminals and logs.

use std::fmt::Write;

use crate::Query;

const MAX_LABEL_CHARS: usize = 70;

/// Truncate to `max_chars` characters, appending an ellipsis when cut.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}…", &s[..idx]),
    }
}

fn label(text: &str) -> String {
    truncate(text, MAX_LABEL_CHARS).trim().replace('\n', " ")
}

impl Query {
    /// Render the tree one node per line, children indented two spaces.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = match self {
            Query::User(s) => writeln!(out, "{}User {}", indent, label(s)),
            Query::System(s) => writeln!(out, "{}System {}", indent, label(s)),
            Query::Assistant(s) => writeln!(out, "{}Assistant {}", indent, label(s)),
            Query::Print(s) => writeln!(out, "{}Print {}", indent, label(s)),
            Query::Cross(_) => writeln!(out, "{}Cross", indent),
            Query::Plus(_) => writeln!(out, "{}Plus", indent),
            Query::Repeat(r) => writeln!(out, "{}Repeat {}", indent, r.n),
            Query::Generate(g) => {
                let mut line = format!("{}Generate model={}", indent, g.model);
                if let Some(max_tokens) = g.max_tokens {
                    let _ = write!(line, " max_tokens={}", max_tokens);
                }
                if let Some(temperature) = g.temperature {
                    let _ = write!(line, " temperature={}", temperature);
                }
                writeln!(out, "{}", line)
            }
        };
        match self {
            Query::Cross(children) | Query::Plus(children) => {
                for child in children {
                    child.render_into(out, depth + 1);
                }
            }
            Query::Repeat(r) => r.query.render_into(out, depth + 1),
            Query::Generate(g) => g.input.render_into(out, depth + 1),
            Query::User(_) | Query::System(_) | Query::Assistant(_) | Query::Print(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Generate;

    #[test]
    fn test_truncate_appends_ellipsis() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello…");
    }

    #[test]
    fn test_render_tree_indents_children() {
        let query = Query::cross([
            Query::system("judge"),
            Query::repeat(
                2,
                Generate::new("m", Query::user("write\none"))
                    .with_max_tokens(50)
                    .into(),
            ),
        ]);
        assert_eq!(
            query.render_tree(),
            "Cross\n  System judge\n  Repeat 2\n    Generate model=m max_tokens=50\n      User write one\n"
        );
    }
}
