use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Session-level dialogue with the mission host. The environment adapter is
/// generic over this seam; tests drive it with a scripted implementation.
pub trait Simulator {
    /// Submit a mission description and start a session.
    fn start_mission(&mut self, mission_xml: &str) -> Result<()>;
    /// Whether the simulator still reports the mission as running.
    fn running(&mut self) -> bool;
    fn send_command(&mut self, cmd: &str) -> Result<()>;
    /// Latest world snapshot, if one has arrived since mission start.
    fn latest_observation(&mut self) -> Result<Option<Value>>;
    /// Sum and clear the rewards the simulator has credited since the last
    /// drain (collect / touch / command-cost anchors).
    fn drain_rewards(&mut self) -> Result<f64>;
    /// End the current mission immediately.
    fn quit(&mut self) -> Result<()>;
}

// =============================================================================
// TCP Client
// =============================================================================

/// Client for a mission host listening on `127.0.0.1:{port}`. Frames are
/// length-prefixed (4-byte big-endian) UTF-8 payloads; requests are
/// `INIT:<xml>`, `CMD:<command>`, `OBS?`, `REW?`, `STATUS?`.
pub struct TcpSimulator {
    stream: TcpStream,
    port: u16,
    mission_running: bool,
}

impl TcpSimulator {
    pub fn connect(port: u16) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .with_context(|| format!("failed to connect to simulator on port {port}"))?;
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .context("set_read_timeout")?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            port,
            mission_running: false,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn request(&mut self, payload: &str) -> Result<String> {
        write_frame(&mut self.stream, payload)?;
        read_frame(&mut self.stream)
    }
}

fn write_frame<W: Write>(w: &mut W, payload: &str) -> Result<()> {
    let bytes = payload.as_bytes();
    let len = (bytes.len() as u32).to_be_bytes();
    w.write_all(&len)?;
    w.write_all(bytes)?;
    w.flush()?;
    Ok(())
}

fn read_frame<R: Read>(r: &mut R) -> Result<String> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).context("simulator sent non-UTF-8 frame")
}

impl Simulator for TcpSimulator {
    fn start_mission(&mut self, mission_xml: &str) -> Result<()> {
        let reply = self.request(&format!("INIT:{mission_xml}"))?;
        if reply != "MISSION_ACCEPTED" {
            bail!("simulator on port {} rejected mission: {reply}", self.port);
        }
        self.mission_running = true;
        Ok(())
    }

    fn running(&mut self) -> bool {
        if !self.mission_running {
            return false;
        }
        match self.request("STATUS?") {
            Ok(status) => {
                self.mission_running = status == "RUNNING";
                self.mission_running
            }
            Err(_) => {
                self.mission_running = false;
                false
            }
        }
    }

    fn send_command(&mut self, cmd: &str) -> Result<()> {
        let reply = self.request(&format!("CMD:{cmd}"))?;
        if reply.starts_with("ERROR") {
            // Simulator-side command errors are logged, not fatal.
            tracing::warn!(port = self.port, %cmd, %reply, "command rejected");
        }
        Ok(())
    }

    fn latest_observation(&mut self) -> Result<Option<Value>> {
        let reply = self.request("OBS?")?;
        if reply == "NONE" {
            return Ok(None);
        }
        match serde_json::from_str(&reply) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(port = self.port, error = %e, "malformed snapshot dropped");
                Ok(None)
            }
        }
    }

    fn drain_rewards(&mut self) -> Result<f64> {
        let reply = self.request("REW?")?;
        Ok(reply.parse::<f64>().unwrap_or(0.0))
    }

    fn quit(&mut self) -> Result<()> {
        if self.mission_running {
            self.send_command("quit")?;
            self.mission_running = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_round_trip_through_the_wire_format() {
        let mut wire = Vec::new();
        write_frame(&mut wire, "CMD:move 1").unwrap();
        write_frame(&mut wire, "OBS?").unwrap();
        assert_eq!(&wire[..4], &10u32.to_be_bytes());

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap(), "CMD:move 1");
        assert_eq!(read_frame(&mut cursor).unwrap(), "OBS?");
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, "STATUS?").unwrap();
        wire.truncate(wire.len() - 2);
        let mut cursor = Cursor::new(wire);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn non_utf8_payload_is_rejected() {
        let mut wire = Vec::from(2u32.to_be_bytes());
        wire.extend_from_slice(&[0xff, 0xfe]);
        let mut cursor = Cursor::new(wire);
        assert!(read_frame(&mut cursor).is_err());
    }
}

// =============================================================================
// Scripted simulator (test support)
// =============================================================================
