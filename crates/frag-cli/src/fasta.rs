//! FASTA line joining: sequence lines are concatenated so that every record
//! becomes exactly one header line and one sequence line.

use anyhow::{bail, Result};
use std::io::{BufRead, Write};

pub fn strip_newlines<R: BufRead, W: Write>(mut input: R, out: &mut W) -> Result<()> {
    let mut started = false;
    let mut in_header = true;
    let mut pending = Vec::new();

    loop {
        let buf = input.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let n = buf.len();
        pending.clear();
        for &c in buf {
            if !started {
                if c != b'>' {
                    bail!("expected > as first character");
                }
                started = true;
                pending.push(c);
                continue;
            }
            if c == b'\n' {
                if !in_header {
                    continue;
                }
                in_header = false;
            } else if c == b'>' {
                in_header = true;
                pending.push(b'\n');
            }
            pending.push(c);
        }
        out.write_all(&pending)?;
        input.consume(n);
    }

    if !started {
        bail!("expected > as first character");
    }
    out.write_all(b"\n")?;
    Ok(())
}
