mod tasks;
mod users;

pub use tasks::{Completion, TaskService, TaskUpdate};
pub use users::UserService;
