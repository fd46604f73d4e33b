use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

/// One typed token of a tool command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Fixed text owned by the tool contract, e.g. `-T` or `--assemble=1`.
    Literal(String),
    /// `flag value`, rendered as two argv entries.
    Opt { flag: String, value: String },
    /// `key=value`, rendered as one argv entry.
    Assign { key: String, value: String },
    Positional(String),
}

impl Arg {
    fn value(&self) -> Option<&str> {
        match self {
            Arg::Literal(_) => None,
            Arg::Opt { value, .. } | Arg::Assign { value, .. } => Some(value),
            Arg::Positional(value) => Some(value),
        }
    }

    fn name(&self) -> &str {
        match self {
            Arg::Literal(text) => text,
            Arg::Opt { flag, .. } => flag,
            Arg::Assign { key, .. } => key,
            Arg::Positional(_) => "positional argument",
        }
    }

    fn push_to(&self, argv: &mut Vec<String>) {
        match self {
            Arg::Literal(text) => argv.push(text.clone()),
            Arg::Opt { flag, value } => {
                argv.push(flag.clone());
                argv.push(value.clone());
            }
            Arg::Assign { key, value } => argv.push(format!("{key}={value}")),
            Arg::Positional(value) => argv.push(value.clone()),
        }
    }
}

/// Where the tool's primary output ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// The tool writes its own output through a flag such as `-o` or `OUTPUT=`.
    Managed,
    /// The tool writes to stdout, which is redirected into this file.
    Stdout(Utf8PathBuf),
}

/// Ordered command line for one external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<Arg>,
    output: OutputMode,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            output: OutputMode::Managed,
        }
    }

    /// `java -Xmx{max_mem_gb}g -jar {jar}`
    pub fn java_jar(max_mem_gb: u64, jar: impl Into<String>) -> Self {
        Self::new("java")
            .literal(format!("-Xmx{max_mem_gb}g"))
            .opt("-jar", jar.into())
    }

    pub fn literal(mut self, text: impl Into<String>) -> Self {
        self.args.push(Arg::Literal(text.into()));
        self
    }

    pub fn opt(mut self, flag: impl Into<String>, value: impl ToString) -> Self {
        self.args.push(Arg::Opt {
            flag: flag.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn assign(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.push(Arg::Assign {
            key: key.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn positional(mut self, value: impl ToString) -> Self {
        self.args.push(Arg::Positional(value.to_string()));
        self
    }

    pub fn stdout_to(mut self, path: impl AsRef<Utf8Path>) -> Self {
        self.output = OutputMode::Stdout(path.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn output(&self) -> &OutputMode {
        &self.output
    }

    /// Render everything after the program name.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() * 2);
        for arg in &self.args {
            arg.push_to(&mut argv);
        }
        argv
    }

    /// Reject commands that would reach the tool malformed.
    pub fn validate(&self) -> Result<(), String> {
        if self.program.trim().is_empty() {
            return Err("program name is empty".to_string());
        }
        for arg in &self.args {
            if let Some(value) = arg.value() {
                if value.trim().is_empty() {
                    return Err(format!("empty value for '{}'", arg.name()));
                }
            }
        }
        if let OutputMode::Stdout(path) = &self.output {
            if path.as_str().trim().is_empty() {
                return Err("empty stdout redirection target".to_string());
            }
        }
        Ok(())
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for token in self.argv() {
            write!(f, " {}", quote(&token))?;
        }
        if let OutputMode::Stdout(path) = &self.output {
            write!(f, " > {}", quote(path.as_str()))?;
        }
        Ok(())
    }
}

// POSIX single quoting, only applied where the token needs it.
fn quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}
