// handlers/elevated/mod.rs - Administrative handlers (admin role required)
//
// Route Prefix: /api/users
// The role check is the ManageRoles permission in UserService.

pub mod users;

pub use users::{list as users_list, put_role as users_put_role};
