pub mod dos_meta;
pub mod path_resolver;
