//! Ciphered byte pipe over a reliable stream.
//!
//! [`SecureStream`] carries one hot-swappable transform per direction and
//! applies them on every read and write. Switches happen only at handshake
//! boundaries where both endpoints have quiesced the stream, so no frame
//! ever straddles a cipher change. After the handshake the pipe splits into
//! a [`SecureReader`] / [`SecureWriter`] pair for the single-reader /
//! single-writer mux phase.

use std::io;

use burrow_crypto::{BoxTransform, CipherPair};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Bidirectional ciphered pipe used during the handshake.
pub struct SecureStream<S> {
    inner: S,
    encrypt: Option<BoxTransform>,
    decrypt: Option<BoxTransform>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SecureStream<S> {
    /// Wrap a raw stream; transforms start as identity (plaintext).
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            encrypt: None,
            decrypt: None,
        }
    }

    /// Replace both transforms. The caller guarantees the peer switches at
    /// the same byte offset.
    pub fn switch_cipher(&mut self, pair: CipherPair) {
        self.encrypt = Some(pair.encrypt);
        self.decrypt = Some(pair.decrypt);
    }

    /// Read exactly `buf.len()` bytes and decrypt them in place.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf).await?;
        if let Some(decrypt) = &mut self.decrypt {
            decrypt.apply(buf);
        }
        Ok(())
    }

    /// Encrypt and write all of `data`.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.encrypt {
            Some(encrypt) => {
                let mut buf = data.to_vec();
                encrypt.apply(&mut buf);
                self.inner.write_all(&buf).await?;
            }
            None => self.inner.write_all(data).await?,
        }
        self.inner.flush().await
    }

    /// Split into independent halves, each keeping its transform.
    pub fn into_split(self) -> (SecureReader<S>, SecureWriter<S>) {
        let (read, write) = tokio::io::split(self.inner);
        (
            SecureReader {
                inner: read,
                decrypt: self.decrypt,
            },
            SecureWriter {
                inner: write,
                encrypt: self.encrypt,
            },
        )
    }
}

/// Receiving half of a split pipe; owned by the mux reader task.
pub struct SecureReader<S> {
    inner: ReadHalf<S>,
    decrypt: Option<BoxTransform>,
}

impl<S: AsyncRead> SecureReader<S> {
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf).await?;
        if let Some(decrypt) = &mut self.decrypt {
            decrypt.apply(buf);
        }
        Ok(())
    }
}

/// Sending half of a split pipe; owned by the writer task.
pub struct SecureWriter<S> {
    inner: WriteHalf<S>,
    encrypt: Option<BoxTransform>,
}

impl<S: AsyncWrite> SecureWriter<S> {
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.encrypt {
            Some(encrypt) => {
                let mut buf = data.to_vec();
                encrypt.apply(&mut buf);
                self.inner.write_all(&buf).await?;
            }
            None => self.inner.write_all(data).await?,
        }
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_crypto::CipherMethod;

    fn pair(method: &CipherMethod) -> CipherPair {
        method
            .build(&vec![0x11; method.key_size], &vec![0x22; method.iv_size])
            .unwrap()
    }

    #[tokio::test]
    async fn plaintext_passthrough() {
        let (a, b) = tokio::io::duplex(256);
        let mut left = SecureStream::new(a);
        let mut right = SecureStream::new(b);

        left.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn ciphered_roundtrip() {
        let method = CipherMethod::named("aes-128-cfb").unwrap();
        let (a, b) = tokio::io::duplex(256);
        let mut left = SecureStream::new(a);
        let mut right = SecureStream::new(b);
        left.switch_cipher(pair(method));
        right.switch_cipher(pair(method));

        left.write_all(b"over the wire").await.unwrap();
        let mut buf = [0u8; 13];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"over the wire");

        // And the reverse direction on the same pipe
        right.write_all(b"echo").await.unwrap();
        let mut buf = [0u8; 4];
        left.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echo");
    }

    #[tokio::test]
    async fn switch_mid_stream() {
        // Plaintext first, then both sides install the cipher at the same
        // offset, as the handshake does.
        let method = CipherMethod::named("rc4").unwrap();
        let (a, b) = tokio::io::duplex(256);
        let mut left = SecureStream::new(a);
        let mut right = SecureStream::new(b);

        left.write_all(b"clear").await.unwrap();
        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"clear");

        left.switch_cipher(pair(method));
        right.switch_cipher(pair(method));

        left.write_all(b"secret").await.unwrap();
        let mut buf = [0u8; 6];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"secret");
    }

    #[tokio::test]
    async fn split_halves_keep_positions() {
        let method = CipherMethod::named("aes-256-cfb").unwrap();
        let (a, b) = tokio::io::duplex(4096);
        let mut left = SecureStream::new(a);
        let mut right = SecureStream::new(b);
        left.switch_cipher(pair(method));
        right.switch_cipher(pair(method));

        // Exchange some handshake-phase bytes first so positions are nonzero.
        left.write_all(b"tail of handshake").await.unwrap();
        let mut buf = [0u8; 17];
        right.read_exact(&mut buf).await.unwrap();

        let (_lr, mut lw) = left.into_split();
        let (mut rr, _rw) = right.into_split();

        lw.write_all(b"framed data").await.unwrap();
        let mut buf = [0u8; 11];
        rr.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"framed data");
    }
}
