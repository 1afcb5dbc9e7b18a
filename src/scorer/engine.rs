// SPDX-License-Identifier: MIT
//! Client for the external analysis engine, run as a child process.

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use super::protocol::{Hello, Request, Response, ScoreRequest, read_message, write_message};
use super::{DetectionResult, FaceId, Region, Scorer};
use crate::child;
use crate::media::Image;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EngineConfig {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

/// Protocol endpoint over an arbitrary reader/writer pair.
pub struct EngineClient<R: Read, W: Write> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> EngineClient<R, W> {
    /// Sends our [`Hello`] and validates the engine's answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe breaks or the engine speaks another protocol.
    pub fn handshake(mut reader: R, mut writer: W) -> Result<Self> {
        write_message(&mut writer, &Hello::current()).context("failed to greet engine")?;
        let hello: Hello = read_message(&mut reader).context("engine did not answer the handshake")?;
        hello.validate()?;
        Ok(Self { reader, writer })
    }

    /// Asks the engine to exit. The engine is not expected to answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be written.
    pub fn shutdown(&mut self) -> Result<()> {
        write_message(&mut self.writer, &Request::Shutdown)
    }

    fn request_score(
        &mut self,
        image: &Image,
        region: Region,
        identifier: Option<FaceId>,
    ) -> Result<DetectionResult> {
        let request = Request::Score(ScoreRequest {
            identifier,
            width: image.width,
            height: image.height,
            region: region.clamped_to(image),
            pixels: &image.data,
        });
        write_message(&mut self.writer, &request).context("failed to send frame to engine")?;

        match read_message(&mut self.reader).context("failed to read engine response")? {
            Response::Detection(result) => Ok(result),
            Response::Error(message) => bail!("engine failed to score frame: {message}"),
        }
    }
}

impl<R: Read, W: Write> Scorer for EngineClient<R, W> {
    fn score(
        &mut self,
        image: &Image,
        region: Region,
        identifier: Option<FaceId>,
    ) -> Result<DetectionResult> {
        self.request_score(image, region, identifier)
    }
}

type PipeClient = EngineClient<BufReader<ChildStdout>, BufWriter<ChildStdin>>;

/// [`Scorer`] backed by a spawned engine process.
pub struct EngineScorer {
    client: Option<PipeClient>,
    child: Child,
    label: String,
}

impl EngineScorer {
    /// Spawns `config.program --data <data_dir>` and performs the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be started or fails the handshake.
    pub fn spawn(config: &EngineConfig, data_dir: &Path) -> Result<Self> {
        let label = config.program.display().to_string();
        let mut cmd = Command::new(&config.program);
        child::own_process_group(&mut cmd);
        let mut child = cmd
            .args(&config.args)
            .arg("--data")
            .arg(data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start analysis engine {label}"))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            child::wait_or_kill(&mut child, &label, Duration::ZERO);
            bail!("failed to capture pipes of analysis engine {label}");
        };

        let client = match EngineClient::handshake(BufReader::new(stdout), BufWriter::new(stdin)) {
            Ok(client) => client,
            Err(e) => {
                child::wait_or_kill(&mut child, &label, Duration::ZERO);
                return Err(e.context(format!("analysis engine {label} rejected the handshake")));
            }
        };
        debug!(engine = %label, pid = child.id(), "analysis engine ready");

        Ok(Self {
            client: Some(client),
            child,
            label,
        })
    }
}

impl Scorer for EngineScorer {
    fn score(
        &mut self,
        image: &Image,
        region: Region,
        identifier: Option<FaceId>,
    ) -> Result<DetectionResult> {
        let Some(client) = self.client.as_mut() else {
            bail!("analysis engine {} is shut down", self.label);
        };
        client.score(image, region, identifier)
    }
}

impl Drop for EngineScorer {
    fn drop(&mut self) {
        if let Some(mut client) = self.client.take()
            && let Err(e) = client.shutdown()
        {
            warn!(engine = %self.label, "failed to request engine shutdown: {e:#}");
        }
        // Closing stdin lets an engine that ignored the request see EOF.
        child::wait_or_kill(&mut self.child, &self.label, SHUTDOWN_GRACE);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::scorer::OrientationHint;
    use crate::scorer::protocol::tests::EngineRequest;
    use crate::scorer::protocol::{MAGIC, PROTOCOL_VERSION};

    fn engine_output(hello: &Hello, responses: &[Response]) -> Cursor<Vec<u8>> {
        let mut wire = Vec::new();
        write_message(&mut wire, hello).unwrap();
        for response in responses {
            write_message(&mut wire, response).unwrap();
        }
        Cursor::new(wire)
    }

    fn image() -> Image {
        Image {
            width: 4,
            height: 2,
            data: vec![9; Image::byte_len(4, 2)],
        }
    }

    #[test]
    fn scores_through_the_pipe() {
        let detection = DetectionResult {
            detected: true,
            score: 42,
            orientation_hints: vec![OrientationHint::Center],
        };
        let reader = engine_output(&Hello::current(), &[Response::Detection(detection.clone())]);
        let mut client = EngineClient::handshake(reader, Vec::new()).unwrap();

        let region = Region {
            x: 2,
            y: 0,
            width: 10,
            height: 10,
        };
        let result = client.score(&image(), region, Some(3)).unwrap();
        assert_eq!(result, detection);
        client.shutdown().unwrap();

        let mut sent = Cursor::new(client.writer);
        let hello: Hello = read_message(&mut sent).unwrap();
        assert_eq!(hello, Hello::current());
        let EngineRequest::Score(req) = read_message(&mut sent).unwrap() else {
            panic!("expected a score request");
        };
        assert_eq!(req.identifier, Some(3));
        assert_eq!((req.region.width, req.region.height), (2, 2));
        assert_eq!(req.pixels.len(), Image::byte_len(4, 2));
        assert!(matches!(read_message(&mut sent).unwrap(), EngineRequest::Shutdown));
    }

    #[test]
    fn engine_error_response_fails_the_call() {
        let reader = engine_output(&Hello::current(), &[Response::Error("no model loaded".into())]);
        let mut client = EngineClient::handshake(reader, Vec::new()).unwrap();
        let err = client
            .score(&image(), Region::full(&image()), None)
            .unwrap_err();
        assert!(format!("{err:#}").contains("no model loaded"));
    }

    #[test]
    fn handshake_rejects_foreign_engine() {
        let hello = Hello {
            magic: MAGIC,
            protocol_version: PROTOCOL_VERSION + 1,
        };
        assert!(EngineClient::handshake(engine_output(&hello, &[]), Vec::new()).is_err());
    }

    #[test]
    fn closed_pipe_is_an_error() {
        let reader = engine_output(&Hello::current(), &[]);
        let mut client = EngineClient::handshake(reader, Vec::new()).unwrap();
        assert!(client.score(&image(), Region::full(&image()), None).is_err());
    }

    #[test]
    fn missing_engine_binary_fails_to_spawn() {
        let config = EngineConfig::new("/nonexistent/facereg-engine");
        assert!(EngineScorer::spawn(&config, &std::env::temp_dir()).is_err());
    }
}
