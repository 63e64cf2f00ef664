//! SASL EXTERNAL handshake: a nul byte, `AUTH EXTERNAL <hex(uid)>`, then
//! `BEGIN` once the bus says `OK`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::error::DbusError;

const MAX_LINE: usize = 512;

pub(crate) async fn authenticate(stream: &mut UnixStream) -> Result<(), DbusError> {
    stream.write_all(&[0]).await?;

    let uid = unsafe { libc::getuid() };
    let cmd = format!("AUTH EXTERNAL {}\r\n", hex_uid(uid));
    stream.write_all(cmd.as_bytes()).await?;

    let line = read_line(stream).await?;
    if !line.starts_with("OK") {
        return Err(DbusError::AuthFailed(line));
    }

    stream.write_all(b"BEGIN\r\n").await?;
    Ok(())
}

/// The uid rendered as decimal ASCII, then hex-encoded byte by byte, as
/// EXTERNAL requires (`1000` -> `31303030`).
fn hex_uid(uid: libc::uid_t) -> String {
    uid.to_string()
        .bytes()
        .map(|b| format!("{b:02x}"))
        .collect()
}

async fn read_line(stream: &mut UnixStream) -> Result<String, DbusError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        match byte[0] {
            b'\n' => break,
            b'\r' => {}
            b => line.push(b),
        }
        if line.len() > MAX_LINE {
            return Err(DbusError::AuthFailed("oversized auth reply".into()));
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::hex_uid;

    #[test]
    fn uid_is_hex_of_its_decimal_ascii() {
        assert_eq!(hex_uid(0), "30");
        assert_eq!(hex_uid(1000), "31303030");
        assert_eq!(hex_uid(65534), "3635353334");
    }
}
