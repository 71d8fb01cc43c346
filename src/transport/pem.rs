//! Utilities for reading PEM-encoded certificates, as necessary to trust an
//! additional CA file given via `-a` (spec §6).

use std::{fs::File, io, io::Read, path::Path};
use tokio_rustls::rustls::Certificate;

/// Read the file at `path` into memory as a vector of PEM-encoded `CERTIFICATE`s, silently skipping
/// any entries in the file which are not labeled `CERTIFICATE`.
pub fn read_certificates(path: impl AsRef<Path>) -> Result<Vec<Certificate>, io::Error> {
    let mut file = File::open(&path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let mut certificates = Vec::new();
    for pem::Pem { contents, .. } in pem::parse_many(contents)
        .into_iter()
        .filter(|p| p.tag == "CERTIFICATE")
    {
        certificates.push(Certificate(contents));
    }
    Ok(certificates)
}
