//! Assembling and linking listings into executables with a C toolchain.

use std::ffi::OsStr;
use std::process::Command;

use target_lexicon::{Environment, Triple};

#[derive(thiserror::Error, Debug)]
pub enum LinkerError {
    #[error("couldn't run linker: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "linker exited with code {code} and stderr output:\n{}",
        String::from_utf8_lossy(.stderr)
    )]
    Exited { code: i32, stderr: Vec<u8> },

    #[error(
        "linker terminated with stderr output:\n{}",
        String::from_utf8_lossy(.stderr))
    ]
    Terminated { stderr: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linker {
    /// The host's `gcc`.
    Gcc,
    /// A command taking `-o <output> <inputs>` after the given arguments.
    Custom(String, Vec<String>),
}

impl Linker {
    /// The toolchain able to build for `target`: the host compiler when
    /// targeting the host, the GNU cross compiler for other ARM Linux targets.
    pub fn detect(target: &Triple) -> Option<Self> {
        if target == &Triple::host() {
            return Some(Self::Gcc);
        }

        let prefix = match target.environment {
            Environment::Gnueabihf => "arm-linux-gnueabihf",
            Environment::Gnueabi => "arm-linux-gnueabi",
            _ => return None,
        };

        Some(Self::Custom(format!("{prefix}-gcc"), vec![]))
    }

    /// Assembles and links `inputs` (assembly listings or objects) into the
    /// executable `output`.
    pub fn link<P0: AsRef<OsStr>, P1: AsRef<OsStr>>(
        &self,
        inputs: &[P0],
        output: P1,
    ) -> Result<(), LinkerError> {
        let mut cmd = match self {
            Self::Gcc => Command::new("gcc"),

            Self::Custom(cmd, args) => {
                let mut cmd = Command::new(cmd);
                cmd.args(args);
                cmd
            }
        };

        cmd.arg("-o");
        cmd.arg(output);
        cmd.args(inputs);

        tracing::debug!("running {cmd:?}");
        let output = cmd.output()?;

        if output.status.success() {
            Ok(())
        } else {
            match output.status.code() {
                Some(code) => Err(LinkerError::Exited {
                    code,
                    stderr: output.stderr,
                }),

                None => Err(LinkerError::Terminated {
                    stderr: output.stderr,
                }),
            }
        }
    }
}
