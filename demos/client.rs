//! TCP line client: connects to the given address, sends stdin lines,
//! prints whatever comes back.
//!
//! Usage: RUST_LOG=info cargo run --example client -- 127.0.0.1:8080

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::{env, process, thread};

use log::{error, info};

fn main() -> io::Result<()> {
    env_logger::init();
    let Some(address) = env::args().nth(1) else {
        eprintln!("usage: client <address:port>");
        process::exit(1);
    };

    let mut stream = TcpStream::connect(address)?;
    info!("connected. Type messages and press Enter to send, Ctrl+C to quit.");

    let read_stream = stream.try_clone()?;
    thread::spawn(move || {
        let mut reader = BufReader::new(read_stream);
        let mut buffer = String::new();
        loop {
            buffer.clear();
            match reader.read_line(&mut buffer) {
                Ok(0) => {
                    info!("server disconnected");
                    break;
                }
                Ok(_) => {
                    print!(">> {buffer}");
                    io::stdout().flush().unwrap();
                }
                Err(e) => {
                    error!("error reading from server: {e}");
                    break;
                }
            }
        }
    });

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(input) => {
                if input.trim().is_empty() {
                    continue;
                }
                if input == "--disconnect" {
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                    break;
                }
                let message = format!("{input}\n");
                if let Err(e) = stream.write_all(message.as_bytes()) {
                    error!("error sending message: {e}");
                    break;
                }
            }
            Err(e) => {
                error!("error reading input: {e}");
                break;
            }
        }
    }

    info!("disconnecting...");
    Ok(())
}
