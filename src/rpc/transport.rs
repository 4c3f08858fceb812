//! Transport abstraction over any byte-oriented channel to the gateway.
//!
//! Concrete implementations:
//! - UART0 (USB-serial bridge on the controller board)
//! - stdin / stdout (host simulation binary)
//!
//! The scheduler is generic over `Transport`, so adding a new
//! transport requires zero changes to the dispatch logic.

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns the number of bytes actually read.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Check if data is available for reading.
    fn available(&self) -> bool;

    /// Write until `data` is exhausted or the channel stops accepting.
    /// Returns the number of bytes written.
    fn write_all(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let mut written = 0;
        while written < data.len() {
            match self.write(&data[written..])? {
                0 => break,
                n => written += n,
            }
        }
        self.flush()?;
        Ok(written)
    }
}
