pub mod inspect;
pub mod runs;
