//! Input selection: a file path, or `-` for stdin.

use std::fs::File;
use std::io::{self, BufRead, BufReader};

/// Open `name` for buffered reading. `-` reads standard input.
pub fn open_input(name: &str) -> io::Result<Box<dyn BufRead>> {
    if name == "-" {
        Ok(Box::new(io::stdin().lock()))
    } else {
        Ok(Box::new(BufReader::new(File::open(name)?)))
    }
}
