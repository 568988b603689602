use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::descriptor::{Descriptor, Digest, Digester};

use super::ContentError;

#[derive(Debug)]
enum State {
    /// Bytes remain before the declared size is reached
    Reading,
    /// Size and digest checked out; any held bytes are still owed to the caller
    Verified,
    /// A verification failure, repeated on every later read
    Poisoned(ContentError),
}

/// Final chunk of content waiting on the boundary check
#[derive(Debug)]
struct Held {
    data: Vec<u8>,
    pos: usize,
}

/// Reader that holds a byte stream to a descriptor.
///
/// Every byte handed to the caller is also fed to a running digest.
///  Exactly `size` bytes are read from the source. The read that reaches
///  the declared size checks that the source is exhausted and that the
///  digest matches before it returns its bytes, so a caller that stops
///  after exactly `size` bytes still gets the verdict. Any failure
///  poisons the reader.
///
/// If the end-of-stream check has to wait on the source, the final chunk
///  is held back and returned once the check passes.
#[derive(Debug)]
pub struct VerifyReader<R> {
    inner: R,
    expected: Digest,
    size: i64,
    remaining: u64,
    digester: Option<Digester>,
    held: Option<Held>,
    state: State,
}

impl<R> VerifyReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, desc: &Descriptor) -> Self {
        let size = desc.size();
        let state = match u64::try_from(size) {
            Ok(_) => State::Reading,
            Err(_) => State::Poisoned(ContentError::InvalidDescriptorSize(size)),
        };
        Self {
            inner,
            expected: desc.digest().clone(),
            size,
            remaining: u64::try_from(size).unwrap_or(0),
            digester: Some(desc.digest().digester()),
            held: None,
            state,
        }
    }

    /// Bytes still expected from the source
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Whether the content has been fully read and verified
    pub fn is_verified(&self) -> bool {
        matches!(self.state, State::Verified)
    }

    fn poison(&mut self, err: ContentError) -> io::Error {
        tracing::debug!(digest = %self.expected, error = %err, "content verification failed");
        self.held = None;
        self.state = State::Poisoned(err.clone());
        err.into()
    }

    fn read_content(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let limit = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.remaining());
        let dst = buf.initialize_unfilled_to(limit);
        let mut limited = ReadBuf::new(dst);
        ready!(Pin::new(&mut self.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();

        if n == 0 {
            let read = self.size - self.remaining as i64;
            let err = ContentError::UnexpectedEof {
                read,
                size: self.size,
            };
            return Poll::Ready(Err(self.poison(err)));
        }

        if let Some(digester) = self.digester.as_mut() {
            digester.update(&dst[..n]);
        }
        self.remaining -= n as u64;

        if self.remaining > 0 {
            buf.advance(n);
            return Poll::Ready(Ok(()));
        }

        // boundary read: no byte of the last chunk leaves before the verdict
        match self.verify(cx) {
            Poll::Ready(Ok(())) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            verdict => {
                // still undecided after a pending or failed source read
                if matches!(self.state, State::Reading) {
                    self.held = Some(Held {
                        data: dst[..n].to_vec(),
                        pos: 0,
                    });
                }
                verdict
            }
        }
    }

    fn verify(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // the source must be exhausted
        let mut extra = [0u8; 1];
        let mut extra_buf = ReadBuf::new(&mut extra);
        ready!(Pin::new(&mut self.inner).poll_read(cx, &mut extra_buf))?;
        if !extra_buf.filled().is_empty() {
            let err = ContentError::TrailingData { size: self.size };
            return Poll::Ready(Err(self.poison(err)));
        }

        let actual = match self.digester.take() {
            Some(digester) => digester.finalize(),
            None => return Poll::Ready(Ok(())),
        };
        if actual != self.expected {
            let err = ContentError::MismatchedDigest {
                expected: self.expected.clone(),
                actual,
            };
            return Poll::Ready(Err(self.poison(err)));
        }

        self.state = State::Verified;
        Poll::Ready(Ok(()))
    }

    /// Hand out whatever verified bytes were held back
    fn drain_held(&mut self, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if let Some(held) = self.held.as_mut() {
            let n = (held.data.len() - held.pos).min(buf.remaining());
            buf.put_slice(&held.data[held.pos..held.pos + n]);
            held.pos += n;
            if held.pos == held.data.len() {
                self.held = None;
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<R> AsyncRead for VerifyReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &this.state {
            State::Poisoned(err) => return Poll::Ready(Err(err.clone().into())),
            State::Verified => return this.drain_held(buf),
            State::Reading => {}
        }

        if this.remaining > 0 {
            return this.read_content(cx, buf);
        }
        ready!(this.verify(cx))?;
        this.drain_held(buf)
    }
}
