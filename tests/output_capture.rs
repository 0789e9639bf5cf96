//! Standard output capture
//!
//! Lives in its own test binary: redirecting fd 1 affects every thread of the
//! process.

#![cfg(unix)]

use dbg_frontend::transport::capture::OutputCapture;

fn write_fd1(text: &str) {
    // SAFETY: the buffer is valid for `text.len()` bytes.
    let written = unsafe { libc::write(1, text.as_ptr().cast(), text.len()) };
    assert_eq!(written, text.len() as isize);
}

#[tokio::test]
async fn test_fd1_lines_reach_the_receiver_until_restored() {
    let (capture, mut lines) = OutputCapture::redirect_stdout().unwrap();

    write_fd1("Stopped: breakpoint\n");
    write_fd1("partial ");
    write_fd1("line\n");
    write_fd1("unterminated");

    assert_eq!(lines.recv().await.as_deref(), Some("Stopped: breakpoint"));
    assert_eq!(lines.recv().await.as_deref(), Some("partial line"));

    capture.restore().unwrap();

    // The tail written before the restore still arrives, then the pump ends
    assert_eq!(lines.recv().await.as_deref(), Some("unterminated"));
    assert_eq!(lines.recv().await, None);
}
