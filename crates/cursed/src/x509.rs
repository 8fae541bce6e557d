use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use rcgen::{
	BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
	DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
	SerialNumber,
};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::config::EcCurve;

/// Organization written into every certificate subject this daemon builds
/// itself (CSR-derived subjects are copied verbatim).
pub const ORG: &str = "CURSED";

#[derive(thiserror::Error, Debug)]
pub enum X509Error {
	#[error("invalid csr: {0}")]
	Csr(#[source] rcgen::Error),

	#[error("failed to build certificate: {0}")]
	Build(#[from] rcgen::Error),

	#[error("key handling failure: {0}")]
	Key(String),
}

/// An EC private key held in both encodings the stack needs: SEC1 PEM
/// (`EC PRIVATE KEY`) for disk, PKCS#8 DER for rcgen and rustls.
pub struct EcKey {
	pub sec1_pem: String,
	pub pkcs8_der: Vec<u8>,
}

impl EcKey {
	pub fn key_pair(&self) -> Result<KeyPair, X509Error> {
		KeyPair::try_from(self.pkcs8_der.as_slice()).map_err(X509Error::Build)
	}
}

pub fn generate_key(curve: EcCurve) -> Result<EcKey, X509Error> {
	let mut rng = rand_core::OsRng;
	let (sec1_pem, pkcs8) = match curve {
		EcCurve::P256 => {
			let sk = p256::SecretKey::random(&mut rng);
			(sk.to_sec1_pem(LineEnding::LF), sk.to_pkcs8_der())
		},
		EcCurve::P384 => {
			let sk = p384::SecretKey::random(&mut rng);
			(sk.to_sec1_pem(LineEnding::LF), sk.to_pkcs8_der())
		},
		EcCurve::P521 => {
			let sk = p521::SecretKey::random(&mut rng);
			(sk.to_sec1_pem(LineEnding::LF), sk.to_pkcs8_der())
		},
	};
	let sec1_pem = sec1_pem.map_err(|e| X509Error::Key(e.to_string()))?;
	let pkcs8 = pkcs8.map_err(|e| X509Error::Key(e.to_string()))?;
	Ok(EcKey {
		sec1_pem: sec1_pem.to_string(),
		pkcs8_der: pkcs8.as_bytes().to_vec(),
	})
}

/// Load an EC key from PEM, accepting both the SEC1 `EC PRIVATE KEY` form we
/// write and the PKCS#8 `PRIVATE KEY` form other tooling produces.
pub fn load_key_pem(pem: &str) -> Result<EcKey, X509Error> {
	if pem.contains("BEGIN EC PRIVATE KEY") {
		let pkcs8 = if let Ok(sk) = p256::SecretKey::from_sec1_pem(pem) {
			sk.to_pkcs8_der()
		} else if let Ok(sk) = p384::SecretKey::from_sec1_pem(pem) {
			sk.to_pkcs8_der()
		} else if let Ok(sk) = p521::SecretKey::from_sec1_pem(pem) {
			sk.to_pkcs8_der()
		} else {
			return Err(X509Error::Key("unsupported EC private key".to_string()));
		};
		let pkcs8 = pkcs8.map_err(|e| X509Error::Key(e.to_string()))?;
		return Ok(EcKey {
			sec1_pem: pem.to_string(),
			pkcs8_der: pkcs8.as_bytes().to_vec(),
		});
	}
	let key_pair = KeyPair::from_pem(pem).map_err(X509Error::Build)?;
	Ok(EcKey {
		sec1_pem: pem.to_string(),
		pkcs8_der: key_pair.serialize_der(),
	})
}

/// Field-level controls for a certificate built from scratch (CA or broker).
pub struct CertOpts {
	pub cn: String,
	/// Single DNS SAN, included iff non-empty.
	pub san: String,
	pub is_ca: bool,
	pub not_before: OffsetDateTime,
	pub not_after: OffsetDateTime,
	/// Big-endian serial bytes.
	pub serial: Vec<u8>,
}

fn build_params(opts: &CertOpts) -> Result<CertificateParams, X509Error> {
	let san = if opts.san.is_empty() {
		Vec::new()
	} else {
		vec![opts.san.clone()]
	};
	let mut params = CertificateParams::new(san)?;
	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, opts.cn.as_str());
	dn.push(DnType::OrganizationName, ORG);
	params.distinguished_name = dn;
	params.not_before = opts.not_before;
	params.not_after = opts.not_after;
	params.serial_number = Some(SerialNumber::from(opts.serial.clone()));
	params.key_usages = vec![
		KeyUsagePurpose::DigitalSignature,
		KeyUsagePurpose::KeyEncipherment,
	];
	params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
	if opts.is_ca {
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.key_usages.push(KeyUsagePurpose::KeyCertSign);
		params
			.extended_key_usages
			.push(ExtendedKeyUsagePurpose::ServerAuth);
	} else {
		params.is_ca = IsCa::ExplicitNoCa;
	}
	Ok(params)
}

/// Self-sign a CA certificate and hand back an issuer for later signings.
pub fn self_signed_ca(
	opts: &CertOpts,
	key: KeyPair,
) -> Result<(String, Issuer<'static, KeyPair>), X509Error> {
	let params = build_params(opts)?;
	let cert = params.self_signed(&key)?;
	let pem = cert.pem();
	Ok((pem, Issuer::new(params, key)))
}

/// Sign a certificate for a locally generated key (the broker serving cert).
pub fn sign_cert(
	opts: &CertOpts,
	subject_key: &KeyPair,
	issuer: &Issuer<'_, KeyPair>,
) -> Result<String, X509Error> {
	let params = build_params(opts)?;
	let cert = params.signed_by(subject_key, issuer)?;
	Ok(cert.pem())
}

pub struct IssuedCert {
	pub pem: String,
	pub der: Vec<u8>,
	pub fingerprint: String,
}

/// A parsed, signature-checked certificate signing request.
///
/// PEM decoding, ASN.1 parsing and the signature check all happen inside
/// `parse_csr`; a value of this type is known-well-formed.
pub struct Csr(CertificateSigningRequestParams);

pub fn parse_csr(csr_pem: &str) -> Result<Csr, X509Error> {
	CertificateSigningRequestParams::from_pem(csr_pem)
		.map(Csr)
		.map_err(X509Error::Csr)
}

impl Csr {
	/// The CN the CSR is asking for, for the force-user-match policy.
	pub fn common_name(&self) -> Option<String> {
		common_name(&self.0.params.distinguished_name)
	}
}

/// Sign a short-lived client certificate from a caller-supplied CSR.
///
/// The CSR's subject is copied; everything else (validity, serial, usages)
/// is imposed here.
pub fn sign_client_csr(
	csr: Csr,
	issuer: &Issuer<'_, KeyPair>,
	not_before: OffsetDateTime,
	not_after: OffsetDateTime,
	serial: Vec<u8>,
) -> Result<IssuedCert, X509Error> {
	let mut csr = csr.0;
	csr.params.not_before = not_before;
	csr.params.not_after = not_after;
	csr.params.serial_number = Some(SerialNumber::from(serial));
	csr.params.is_ca = IsCa::ExplicitNoCa;
	csr.params.key_usages = vec![
		KeyUsagePurpose::DigitalSignature,
		KeyUsagePurpose::KeyEncipherment,
	];
	csr.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
	// The template is authoritative: requested SANs are not carried over.
	csr.params.subject_alt_names.clear();

	let cert = csr.signed_by(issuer)?;
	let der = cert.der().to_vec();
	let fingerprint = cert_fingerprint(&der);
	Ok(IssuedCert {
		pem: cert.pem(),
		der,
		fingerprint,
	})
}

fn common_name(dn: &DistinguishedName) -> Option<String> {
	match dn.get(&DnType::CommonName)? {
		DnValue::Utf8String(s) => Some(s.clone()),
		DnValue::PrintableString(s) => Some(s.as_str().to_string()),
		_ => None,
	}
}

/// Unpadded URL-safe base64 of SHA-256 over the DER encoding.
pub fn cert_fingerprint(der: &[u8]) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(der))
}

#[cfg(test)]
#[path = "x509_tests.rs"]
mod tests;
