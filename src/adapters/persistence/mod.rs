//! File-backed stores: the YAML configuration document and the download history log.

pub mod history_jsonl;
pub mod yaml_store;

pub use history_jsonl::JsonlHistory;
pub use yaml_store::YamlConfigStore;
