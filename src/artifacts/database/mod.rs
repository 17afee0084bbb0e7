//! Values handed out by the object database when it walks trees

pub mod database_entry;
