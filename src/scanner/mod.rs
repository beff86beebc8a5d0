//! File selection: language tables, filesystem walk, and git status.

pub mod git;
pub mod languages;
pub mod walk;

pub use git::{detect_repository, Repository};
pub use languages::{
    extensions_for, language_for_extension, parse_language_list, parse_languages,
    prompt_for_languages, LanguageEntry, LANGUAGES,
};
pub use walk::{describe_file, FileScanner, MAX_FILE_LINES, MAX_FILE_SIZE};
