//! Request framing.

use bytes::{BufMut, BytesMut};

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    out.reserve(encoded_len(args));
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// Exact number of bytes `encode_command` writes for `args`.
pub fn encoded_len<A: AsRef<[u8]>>(args: &[A]) -> usize {
    let mut len = 1 + digits(args.len()) + 2;
    for arg in args {
        let arg_len = arg.as_ref().len();
        len += 1 + digits(arg_len) + 2 + arg_len + 2;
    }
    len
}

fn digits(mut value: usize) -> usize {
    let mut count = 1;
    while value >= 10 {
        value /= 10;
        count += 1;
    }
    count
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_command() {
        let mut buf = BytesMut::new();
        encode_command(&[&b"GET"[..], &b"key"[..]], &mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_empty_argument() {
        let mut buf = BytesMut::new();
        encode_command(&["SET", "k", ""], &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n");
    }

    #[test]
    fn encoded_len_matches_output() {
        let args = ["MSET", "a-long-key-name", "0123456789"];
        let mut buf = BytesMut::new();
        encode_command(&args, &mut buf);
        assert_eq!(buf.len(), encoded_len(&args));
    }
}
