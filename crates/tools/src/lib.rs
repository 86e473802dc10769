//! Tool implementations for huddle.
//!
//! The model can query Asana: projects, incomplete tasks per project or
//! per assignee, and workspace users. Web search is not here; it runs on
//! the provider's side (see `huddle_core::ServerTool`).

pub mod asana;
pub mod asana_tools;

use huddle_core::tool::ToolRegistry;
use std::sync::Arc;

pub use asana::AsanaClient;

/// Register the four Asana tools, sharing one client.
pub fn register_asana(registry: &mut ToolRegistry, client: AsanaClient) {
    let client = Arc::new(client);
    registry.register(Box::new(asana_tools::ListProjectsTool::new(client.clone())));
    registry.register(Box::new(asana_tools::ListProjectTasksTool::new(client.clone())));
    registry.register(Box::new(asana_tools::ListUserTasksTool::new(client.clone())));
    registry.register(Box::new(asana_tools::ListUsersTool::new(client)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_asana_tools() {
        let mut registry = ToolRegistry::new();
        register_asana(&mut registry, AsanaClient::new("key"));
        assert_eq!(
            registry.names(),
            vec![
                "list_asana_project_tasks",
                "list_asana_projects",
                "list_asana_user_tasks",
                "list_asana_users",
            ]
        );
    }
}
