use std::io::Write;
use std::path::Path;

use miette::IntoDiagnostic;
use runctl_emulator::Image;

/// Runs the subcommand for dumping the line table of a program image.
pub fn evaluate_lines(image: &Path, mut output: impl Write) -> miette::Result<()> {
    let content = std::fs::read_to_string(image).into_diagnostic()?;

    let filename = image
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("<image>");

    let image = Image::parse(filename, &content)?;

    for (addr, line) in image.lines() {
        writeln!(output, "{addr:#010x} {line}").into_diagnostic()?;
    }

    Ok(())
}
