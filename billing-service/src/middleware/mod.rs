pub mod actor;
pub mod extract;

pub use actor::{ActorContext, BRANCH_ID_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
pub use extract::{ApiJson, ApiQuery, ValidatedJson};
