//! Collector-side signature check
//!
//! Usage: `verify_signature <key> <body-file> [mac]`
//!
//! Without a `mac` the signature of the body is printed; with one, it is
//! verified the way a collector would.

use logship::upload::signing;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (key, file) = match (args.first(), args.get(1)) {
        (Some(key), Some(file)) => (key, file),
        _ => {
            eprintln!("Usage: verify_signature <key> <body-file> [mac]");
            std::process::exit(2);
        }
    };

    let body = std::fs::read(file)?;

    match args.get(2) {
        None => println!("{}", signing::sign(&body, key.as_bytes())),
        Some(mac) => {
            if signing::verify(&body, mac, key.as_bytes()) {
                println!("Signature valid");
            } else {
                println!("Signature INVALID");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
