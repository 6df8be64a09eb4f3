pub mod file;
pub mod io;
pub mod random;
pub mod sha;
pub mod size;
