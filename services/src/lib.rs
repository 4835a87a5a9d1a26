//!
//! Wrappers around the external programs used to turn mail content into PDFs.
//!
//! Every service here shells out to a command-line tool (wkhtmltopdf, LibreOffice, a PDF viewer) and
//! exposes a small async interface over it. Programs and their locations come from [`config()`].
//!
#![warn(missing_docs)]

use std::ffi::OsStr;
use std::fmt;
use std::fmt::Formatter;
use std::ops::DerefMut;
use std::process::{ExitStatus, Stdio};

use anyhow::anyhow;
use bytesize::MB;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::join;

pub use config::*;
pub use html_to_pdf::*;
pub use office_to_pdf::*;
pub use viewer::*;

mod config;
mod html_to_pdf;
mod office_to_pdf;
mod viewer;

/// Defines a closure that logs an error if the [`Result`] passed in is an error.
///
/// Arguments follow the same syntax as [`format!`].
///
#[macro_export]
macro_rules! log_err {
    ($($arg:tt)+) => (
        |res| if let Err(err) = res {
            let msg = format!($($arg)+);
            log::error!("{}: {}", msg, err);
        }
    );
}

/// Error type for when a command execution fails.
///
#[derive(Debug)]
pub struct CommandError<E = anyhow::Error> {
    /// The exit status of the command, if it has one.
    ///
    pub exit_status: Option<ExitStatus>,

    inner: E,
}

impl CommandError {
    /// Create a new [`CommandError`] for a command that never got to exit, e.g. it could not be spawned.
    ///
    pub fn pre_exit<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            exit_status: None,
            inner: anyhow::Error::new(err),
        }
    }

    /// Create a new [`CommandError`] for a command that exited but whose I/O failed.
    ///
    pub fn post_exit<E>(exit_status: ExitStatus, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            exit_status: Some(exit_status),
            inner: anyhow::Error::new(err),
        }
    }

    /// Create a new [`CommandError`] for a command that exited unsuccessfully.
    ///
    pub fn non_zero(exit_status: ExitStatus) -> Self {
        Self {
            exit_status: Some(exit_status),
            inner: anyhow!("command failed with non-zero exit code"),
        }
    }

    /// Returns the exit code of the command, if it has one.
    ///
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.exit_status {
            None => write!(f, "command failed before exiting: {}", self.inner),
            Some(status) => {
                let code = status
                    .code()
                    .map(|code| code.to_string())
                    .unwrap_or("?".to_string());
                write!(f, "command failed (code {}): {}", code, self.inner)
            }
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Run a command to completion, streaming its standard streams.
///
/// # Arguments
///
/// * `program` - The program to run.
/// * `arguments` - The arguments to pass to the program.
/// * `input` - Streamed into stdin, if given. Stdin is closed otherwise.
/// * `output` - Receives stdout, if given.
/// * `error` - Receives stderr, if given.
///
/// # Returns
///
/// The exit status if the program exited successfully.
///
/// Otherwise a [`CommandError`]:
/// 1. The command could not be spawned or waited on, so the exit status is [`None`]
/// 2. The command finished, but streaming failed, so the exit status and error are populated
/// 3. The command finished with a non-zero exit status
///
/// Whenever an exit status is present, `error` holds everything the command wrote to stderr.
///
pub(crate) async fn stream_command<R, W, E>(
    program: impl AsRef<OsStr>,
    arguments: impl IntoIterator<Item = impl AsRef<OsStr>>,
    input: Option<R>,
    output: Option<W>,
    error: Option<E>,
) -> Result<ExitStatus, CommandError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut proc = tokio::process::Command::new(program.as_ref())
        .args(arguments)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(CommandError::pre_exit)?;

    let writing = transfer(input, proc.stdin.take());
    let reading = transfer(proc.stdout.take(), output);
    let erroring = transfer(proc.stderr.take(), error);

    // Don't `try_join!` to allow the error buffer to be written to completion
    let (writing_res, reading_res, erroring_res) = join!(writing, reading, erroring);
    let exit_status = proc.wait().await.map_err(CommandError::pre_exit)?;

    writing_res
        .and(reading_res)
        .and(erroring_res)
        .map_err(|err| CommandError::post_exit(exit_status, err))?;

    if exit_status.success() {
        Ok(exit_status)
    } else {
        Err(CommandError::non_zero(exit_status))
    }
}

/// Copies `reader` into `writer` until EOF, then shuts the writer down.
///
/// A missing side is a no-op, which drops (and so closes) the other side.
///
async fn transfer<R, W>(reader: Option<R>, writer: Option<W>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let (Some(mut reader), Some(mut writer)) = (reader, writer) {
        let mut buf = vec![0u8; MB as usize];
        loop {
            let read = reader.read(buf.deref_mut()).await?;
            if read == 0 {
                break;
            }
            writer.write_all(&buf[..read]).await?;
        }
        writer.shutdown().await?;
    }
    Ok(())
}

fn trim_to_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .replace('\u{0}', "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::{stream_command, trim_to_string};

    fn buffers(data: &[u8]) -> (Cursor<Vec<u8>>, Vec<u8>, Vec<u8>) {
        (Cursor::new(data.to_vec()), vec![], vec![])
    }

    #[tokio::test]
    async fn test_stream_command_succeeds() {
        let (mut input, mut output, mut error) = buffers(b"%PDF-1.5 body");

        let exit_status = stream_command(
            "cat",
            Vec::<&str>::new(),
            Some(&mut input),
            Some(&mut output),
            Some(&mut error),
        )
        .await
        .unwrap();

        assert_eq!(exit_status.code(), Some(0));
        assert_eq!(trim_to_string(&output), "%PDF-1.5 body");
        assert!(error.is_empty());
    }

    #[tokio::test]
    async fn test_stream_command_without_input_closes_stdin() {
        let mut output = vec![];

        let result = stream_command(
            "cat",
            Vec::<&str>::new(),
            Option::<Cursor<Vec<u8>>>::None,
            Some(&mut output),
            Option::<Vec<u8>>::None,
        )
        .await;

        assert!(result.is_ok());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_stream_command_fails_pre_exit() {
        let (mut input, mut output, mut error) = buffers(b"ignored");

        let command_err = stream_command(
            "soffice-that-is-not-installed",
            vec!["--headless"],
            Some(&mut input),
            Some(&mut output),
            Some(&mut error),
        )
        .await
        .unwrap_err();

        assert_eq!(command_err.exit_status, None);
        assert_eq!(command_err.exit_code(), None);
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_stream_command_fails_post_exit_non_zero_status() {
        let (mut input, mut output, mut error) = buffers(b"");

        let command_err = stream_command(
            "sh",
            vec!["-c", "echo busy >&2; exit 13"],
            Some(&mut input),
            Some(&mut output),
            Some(&mut error),
        )
        .await
        .unwrap_err();

        assert_eq!(command_err.exit_code(), Some(13));
        assert_eq!(
            command_err.inner.to_string(),
            "command failed with non-zero exit code"
        );
        assert!(output.is_empty());
        assert_eq!(trim_to_string(&error), "busy");
    }

    #[test]
    fn test_trim_to_string() {
        assert_eq!(trim_to_string(b"  Loading pages\0\n"), "Loading pages");
    }
}
