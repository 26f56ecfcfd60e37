mod activity;
mod issue;
mod named_ref;
mod page;
mod project;
mod time_entry;
mod user;

pub use activity::{default_activity, Activity, IssueStatus};
pub use issue::{Issue, IssueUpdate};
pub use named_ref::NamedRef;
pub use page::Page;
pub use project::Project;
pub use time_entry::{IssueRef, TimeEntry, TimeEntryCreate, TimeEntryUpdate};
pub use user::CurrentUser;
