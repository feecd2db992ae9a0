//! Table output for CLI listings, rendered with comfy-table.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use super::output::{short_id, truncate};
use crate::domain::models::{
    ActivityRecord, Actor, Message, Outcome, Sprint, SprintStatus, Task, TaskStatus,
};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
        }
    }

    pub fn plain() -> Self {
        Self { use_colors: false }
    }

    pub fn format_tasks(&self, tasks: &[Task]) -> String {
        let mut table = self.base_table(&["ID", "Title", "Status", "Priority", "Effort", "Assignee", "Deps"]);
        for task in tasks {
            let mut status = self.status_cell(task.status);
            if task.quarantined {
                status = Cell::new(format!("{} (quarantined)", task.status)).fg(Color::Red);
            }
            table.add_row(vec![
                Cell::new(short_id(&task.id)),
                Cell::new(truncate(&task.title, 40)),
                status,
                Cell::new(task.priority),
                Cell::new(task.estimated_effort),
                Cell::new(task.assignee.as_deref().unwrap_or("-")),
                Cell::new(task.depends_on.len()),
            ]);
        }
        table.to_string()
    }

    pub fn format_actors(&self, actors: &[Actor]) -> String {
        let mut table = self.base_table(&["ID", "Role", "Capabilities", "Active"]);
        for actor in actors {
            let caps: Vec<&str> = actor.capabilities.iter().map(String::as_str).collect();
            let active = if actor.active {
                self.colored("yes", Color::Green)
            } else {
                self.colored("no", Color::DarkGrey)
            };
            table.add_row(vec![
                Cell::new(&actor.id),
                Cell::new(&actor.role),
                Cell::new(if caps.is_empty() { "-".to_string() } else { caps.join(", ") }),
                active,
            ]);
        }
        table.to_string()
    }

    pub fn format_sprints(&self, sprints: &[Sprint]) -> String {
        let mut table = self.base_table(&["ID", "Goal", "Owner", "Status", "Starts", "Ends"]);
        for sprint in sprints {
            let color = match sprint.status {
                SprintStatus::Planning => Color::Yellow,
                SprintStatus::Active => Color::Cyan,
                SprintStatus::Closed => Color::DarkGrey,
            };
            table.add_row(vec![
                Cell::new(short_id(&sprint.id)),
                Cell::new(truncate(&sprint.goal, 40)),
                Cell::new(&sprint.owner),
                self.colored(sprint.status.as_str(), color),
                Cell::new(sprint.starts_at.format("%Y-%m-%d")),
                Cell::new(sprint.ends_at.format("%Y-%m-%d")),
            ]);
        }
        table.to_string()
    }

    pub fn format_messages(&self, messages: &[Message]) -> String {
        let mut table = self.base_table(&["ID", "When", "From", "To", "Intent", "Task", "Body"]);
        for message in messages {
            table.add_row(vec![
                Cell::new(short_id(&message.id)),
                Cell::new(message.created_at.format("%Y-%m-%d %H:%M:%S")),
                Cell::new(&message.sender),
                Cell::new(&message.receiver),
                Cell::new(message.intent.to_string()),
                Cell::new(message.related_task.as_ref().map_or_else(|| "-".to_string(), short_id)),
                Cell::new(truncate(&message.body, 50)),
            ]);
        }
        table.to_string()
    }

    pub fn format_activity(&self, records: &[ActivityRecord]) -> String {
        let mut table = self.base_table(&["When", "Actor", "Category", "Outcome", "Task", "Description"]);
        for record in records {
            let outcome = match record.outcome {
                Outcome::Success => self.colored(record.outcome.as_str(), Color::Green),
                Outcome::Failure => self.colored(record.outcome.as_str(), Color::Red),
            };
            table.add_row(vec![
                Cell::new(record.timestamp.format("%Y-%m-%d %H:%M:%S")),
                Cell::new(&record.actor_id),
                Cell::new(record.category.as_str()),
                outcome,
                Cell::new(record.related_task.as_ref().map_or_else(|| "-".to_string(), short_id)),
                Cell::new(truncate(&record.description, 60)),
            ]);
        }
        table.to_string()
    }

    fn base_table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(
                headers
                    .iter()
                    .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
            );
        table
    }

    fn status_cell(&self, status: TaskStatus) -> Cell {
        self.colored(status.as_str(), status_color(status))
    }

    fn colored(&self, text: &str, color: Color) -> Cell {
        if self.use_colors {
            Cell::new(text).fg(color)
        } else {
            Cell::new(text)
        }
    }
}

/// Check if color output is supported
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

const fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Backlog => Color::White,
        TaskStatus::Assigned => Color::Blue,
        TaskStatus::InProgress => Color::Cyan,
        TaskStatus::Review => Color::Yellow,
        TaskStatus::Done => Color::Green,
        TaskStatus::Blocked => Color::Red,
        TaskStatus::Cancelled => Color::DarkGrey,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_table_lists_rows() {
        let task = Task::new("Write the parser", "planner");
        let rendered = TableFormatter::plain().format_tasks(&[task.clone()]);
        assert!(rendered.contains("Write the parser"));
        assert!(rendered.contains(&short_id(&task.id)));
        assert!(rendered.contains("backlog"));
    }

    #[test]
    fn test_actor_table_shows_capabilities() {
        let actor = Actor::new("dev-1", "implementer").with_capability("rust");
        let rendered = TableFormatter::plain().format_actors(&[actor]);
        assert!(rendered.contains("dev-1"));
        assert!(rendered.contains("rust"));
    }
}
