//! ipconv — print the three renderings of an IPv4 address.
//!
//! The scanner stores addresses as signed 32-bit integers; this utility
//! translates between that storage form, the unsigned form, and dotted-quad
//! for poking at the results table by hand.

use anyhow::{bail, Result};
use clap::Parser;
use sweep_core::addr;

#[derive(Parser, Debug)]
#[clap(
    name = "ipconv",
    version,
    about = "IPv4 address representation converter",
    long_about = None
)]
struct Cli {
    /// Unsigned 32-bit representation
    #[clap(long)]
    uint: Option<u32>,

    /// Signed 32-bit representation, as stored in the results table
    #[clap(long, allow_negative_numbers = true)]
    int: Option<i32>,

    /// Dotted-quad representation
    #[clap(long)]
    cidr: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ip: u32 = match (cli.uint, cli.int, cli.cidr) {
        (Some(unsigned), None, None) => unsigned,
        (None, Some(signed), None) => addr::to_unsigned(signed),
        (None, None, Some(text)) => addr::parse_dotted(&text)?,
        _ => bail!("pass exactly one of --uint, --int, --cidr"),
    };

    println!("Int: {}", addr::to_signed(ip));
    println!("Uint: {}", ip);
    println!("Cidr: {}", addr::dotted(ip));
    Ok(())
}
