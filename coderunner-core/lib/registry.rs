//! Language registry: the immutable table of supported language toolchains.
//!
//! This module provides:
//! - [`LanguageSpec`], one record per supported language
//! - [`LanguageRegistry`] with `lookup` and `list`
//! - Stdin detection over submitted source text
//!
//! The table is populated at startup and never mutated. The registry is
//! configuration: any spec set satisfying the sandbox image contract is
//! accepted, and the default set carries the seven languages the service
//! ships images for.

use std::collections::HashMap;

use getset::Getters;
use regex::{Regex, RegexBuilder};

use crate::{CoderunnerError, CoderunnerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Memory class of a sandbox, sized for the language runtime's idle footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    /// 100 MiB, enough for most interpreters and compiled binaries.
    Standard,

    /// 256 MiB, for runtimes that fail under the standard limit.
    Heavy,
}

/// Immutable description of one supported language.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct LanguageSpec {
    /// Short identifier clients use, e.g. `python`.
    tag: String,

    /// Prebuilt sandbox image for this language.
    image: String,

    /// Filename the source is written under inside the sandbox.
    source_filename: String,

    /// Argument vector executed in the sandbox working directory.
    run_command: Vec<String>,

    /// Shell line used when the source must be compiled before running.
    /// Build artifacts go under writable `/tmp`, never `/code`.
    compile_run_command: Option<String>,

    /// Memory class applied to the sandbox.
    memory_class: MemoryClass,

    /// Case-insensitive pattern indicating the program reads stdin.
    stdin_detector: Regex,
}

/// Lookup table from language tag to [`LanguageSpec`].
#[derive(Debug)]
pub struct LanguageRegistry {
    specs: HashMap<String, LanguageSpec>,
}

//--------------------------------------------------------------------------------------------------
// Implementations
//--------------------------------------------------------------------------------------------------

impl MemoryClass {
    /// Hard memory limit in bytes for this class.
    pub fn limit_bytes(&self) -> i64 {
        match self {
            MemoryClass::Standard => 100 * 1024 * 1024,
            MemoryClass::Heavy => 256 * 1024 * 1024,
        }
    }
}

impl LanguageSpec {
    /// Create a spec, compiling the stdin detector case-insensitively.
    pub fn new(
        tag: impl Into<String>,
        image: impl Into<String>,
        source_filename: impl Into<String>,
        run_command: Vec<String>,
        compile_run_command: Option<String>,
        memory_class: MemoryClass,
        stdin_pattern: &str,
    ) -> CoderunnerResult<Self> {
        let stdin_detector = RegexBuilder::new(stdin_pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                CoderunnerError::Config(format!("invalid stdin pattern {:?}: {}", stdin_pattern, e))
            })?;

        Ok(Self {
            tag: tag.into(),
            image: image.into(),
            source_filename: source_filename.into(),
            run_command,
            compile_run_command,
            memory_class,
            stdin_detector,
        })
    }

    /// Whether the submitted source appears to read standard input.
    pub fn reads_stdin(&self, source: &str) -> bool {
        self.stdin_detector.is_match(source)
    }

    /// The command that runs (and compiles, if needed) the source.
    pub fn command(&self) -> Vec<String> {
        match &self.compile_run_command {
            Some(line) => shell_command(line),
            None => self.run_command.clone(),
        }
    }

    /// The shell-pipe variant of [`Self::command`], feeding `input.txt`
    /// to the program as a file-like stdin stream.
    pub fn piped_command(&self) -> Vec<String> {
        let runner = match &self.compile_run_command {
            Some(line) => line.clone(),
            None => self.run_command.join(" "),
        };
        shell_command(&format!("cat input.txt | {}", runner))
    }
}

impl LanguageRegistry {
    /// Build a registry from an explicit spec set.
    pub fn new(specs: Vec<LanguageSpec>) -> Self {
        let specs = specs
            .into_iter()
            .map(|spec| (spec.get_tag().to_lowercase(), spec))
            .collect();

        Self { specs }
    }

    /// Build the registry with the default language set.
    pub fn with_defaults() -> CoderunnerResult<Self> {
        Ok(Self::new(default_specs()?))
    }

    /// Look up a language by tag, case-insensitively.
    pub fn lookup(&self, tag: &str) -> CoderunnerResult<&LanguageSpec> {
        self.specs
            .get(&tag.to_lowercase())
            .ok_or_else(|| CoderunnerError::UnknownLanguage(tag.to_string()))
    }

    /// All registered tags, sorted for stable listing.
    pub fn list(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.specs.keys().cloned().collect();
        tags.sort();
        tags
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The default language set: the seven languages the service ships images for.
pub fn default_specs() -> CoderunnerResult<Vec<LanguageSpec>> {
    Ok(vec![
        LanguageSpec::new(
            "python",
            "coderunner-python",
            "script.py",
            argv(&["python3", "-u", "script.py"]),
            None,
            MemoryClass::Standard,
            r"input\s*\(",
        )?,
        LanguageSpec::new(
            "javascript",
            "coderunner-node",
            "script.js",
            argv(&["node", "script.js"]),
            None,
            MemoryClass::Standard,
            r"readline|process\.stdin",
        )?,
        LanguageSpec::new(
            "cpp",
            "coderunner-cpp",
            "main.cpp",
            argv(&["/tmp/build/main"]),
            Some(
                "mkdir -p /tmp/build && g++ -O2 -o /tmp/build/main main.cpp && /tmp/build/main"
                    .to_string(),
            ),
            MemoryClass::Standard,
            r"cin\s*>>|getline\s*\(|scanf\s*\(",
        )?,
        LanguageSpec::new(
            "java",
            "coderunner-java",
            "Main.java",
            argv(&["java", "Main"]),
            Some(
                "mkdir -p /tmp/build && javac -d /tmp/build Main.java && java -cp /tmp/build Main"
                    .to_string(),
            ),
            MemoryClass::Heavy,
            r"Scanner|BufferedReader",
        )?,
        LanguageSpec::new(
            "go",
            "coderunner-go",
            "main.go",
            argv(&["/tmp/build/main"]),
            Some(
                "mkdir -p /tmp/build && GOCACHE=/tmp/gocache go build -o /tmp/build/main main.go && /tmp/build/main"
                    .to_string(),
            ),
            MemoryClass::Standard,
            r"Scan|ReadString",
        )?,
        LanguageSpec::new(
            "ruby",
            "coderunner-ruby",
            "script.rb",
            argv(&["ruby", "script.rb"]),
            None,
            MemoryClass::Standard,
            r"gets|readline",
        )?,
        LanguageSpec::new(
            "dart",
            "coderunner-dart",
            "main.dart",
            argv(&["dart", "main.dart"]),
            None,
            MemoryClass::Heavy,
            r"readLineSync|stdin\.read",
        )?,
    ])
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn shell_command(line: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), line.to_string()]
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> LanguageRegistry {
        LanguageRegistry::with_defaults().unwrap()
    }

    #[test]
    fn default_set_lists_seven_languages() {
        let tags = registry().list();
        assert_eq!(
            tags,
            vec!["cpp", "dart", "go", "java", "javascript", "python", "ruby"]
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = registry();
        assert_eq!(registry.lookup("Python").unwrap().get_tag(), "python");
        assert_eq!(registry.lookup("JAVA").unwrap().get_tag(), "java");
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let registry = registry();
        let result = registry.lookup("brainfuck");
        assert!(matches!(result, Err(CoderunnerError::UnknownLanguage(_))));
    }

    #[test]
    fn source_filenames_follow_the_language_rules() {
        let registry = registry();
        assert_eq!(
            registry.lookup("java").unwrap().get_source_filename(),
            "Main.java"
        );
        assert_eq!(
            registry.lookup("cpp").unwrap().get_source_filename(),
            "main.cpp"
        );
        assert_eq!(
            registry.lookup("go").unwrap().get_source_filename(),
            "main.go"
        );
        assert_eq!(
            registry.lookup("dart").unwrap().get_source_filename(),
            "main.dart"
        );
        assert_eq!(
            registry.lookup("python").unwrap().get_source_filename(),
            "script.py"
        );
    }

    #[test]
    fn heavy_runtimes_get_the_larger_memory_class() {
        let registry = registry();
        assert_eq!(
            *registry.lookup("java").unwrap().get_memory_class(),
            MemoryClass::Heavy
        );
        assert_eq!(
            *registry.lookup("dart").unwrap().get_memory_class(),
            MemoryClass::Heavy
        );
        assert_eq!(
            *registry.lookup("python").unwrap().get_memory_class(),
            MemoryClass::Standard
        );
        assert_eq!(MemoryClass::Standard.limit_bytes(), 100 * 1024 * 1024);
        assert_eq!(MemoryClass::Heavy.limit_bytes(), 256 * 1024 * 1024);
    }

    #[test]
    fn stdin_detection_is_case_insensitive() {
        let registry = registry();
        let python = registry.lookup("python").unwrap();

        assert!(python.reads_stdin("name = input('who? ')"));
        assert!(python.reads_stdin("NAME = INPUT('who? ')"));
        assert!(!python.reads_stdin("print('hello')"));
    }

    #[test]
    fn stdin_detection_covers_the_usual_read_primitives() {
        let registry = registry();

        assert!(registry
            .lookup("java")
            .unwrap()
            .reads_stdin("Scanner sc = new Scanner(System.in);"));
        assert!(registry
            .lookup("cpp")
            .unwrap()
            .reads_stdin("std::cin >> x;"));
        assert!(registry
            .lookup("go")
            .unwrap()
            .reads_stdin("fmt.Scan(&x)"));
        assert!(registry
            .lookup("javascript")
            .unwrap()
            .reads_stdin("process.stdin.on('data', cb)"));
    }

    #[test]
    fn interpreted_languages_run_their_plain_argv() {
        let registry = registry();
        let python = registry.lookup("python").unwrap();

        assert_eq!(python.command(), vec!["python3", "-u", "script.py"]);
    }

    #[test]
    fn compiled_languages_run_through_the_shell() {
        let registry = registry();
        let cpp = registry.lookup("cpp").unwrap();
        let command = cpp.command();

        assert_eq!(command[0], "/bin/sh");
        assert_eq!(command[1], "-c");
        assert!(command[2].contains("g++"));
        assert!(command[2].contains("/tmp/build"));
    }

    #[test]
    fn piped_command_prefixes_the_input_file() {
        let registry = registry();
        let python = registry.lookup("python").unwrap();
        let command = python.piped_command();

        assert_eq!(command[0], "/bin/sh");
        assert_eq!(command[1], "-c");
        assert_eq!(command[2], "cat input.txt | python3 -u script.py");
    }
}
