//! End-to-end flows over a real (temporary) trust domain directory.

use assert_fs::TempDir;
use certmint::{
	issue_host, load_root_key, CaPaths, CertificateInfo, CertificateParams, Issuer, KeyPair,
	Subject,
};
use x509_parser::prelude::{FromDer, X509Certificate};

fn subject_template() -> Subject {
	Subject {
		country: Some("US".into()),
		state_or_province: Some("Washington".into()),
		locality: Some("Redmond".into()),
		organization: Some("Contoso".into()),
		organizational_unit: Some("Contoso".into()),
		..Subject::new("Root CA")
	}
}

fn bootstrap(paths: &CaPaths, secret: Option<&str>) -> KeyPair {
	paths.init_directories().unwrap();
	let root_key = KeyPair::generate(2048).unwrap();
	let params = CertificateParams::root(subject_template(), 3650).unwrap();
	paths.save_root_key(&root_key.to_pem(secret).unwrap()).unwrap();
	paths
		.save_root_cert(&params.self_sign_pem(&root_key).unwrap())
		.unwrap();
	root_key
}

#[test]
fn init_then_issue_produces_a_verifiable_chain() {
	let temp = TempDir::new().unwrap();
	let paths = CaPaths::new(temp.path());
	let root_key = bootstrap(&paths, None);

	let issuer = Issuer::new(&paths.load_root_cert_pem().unwrap(), &root_key).unwrap();
	let issued = issue_host(
		&paths,
		&issuer,
		"host.example.com",
		&["alt.example.com".to_string(), "10.0.0.1".to_string()],
		subject_template(),
		2048,
		90,
	)
	.unwrap();

	// all three artifacts landed where the layout says
	assert!(paths.host_key_path("host.example.com").unwrap().exists());
	assert!(paths.host_csr_path("host.example.com").unwrap().exists());
	assert!(paths.host_cert_path("host.example.com").unwrap().exists());

	// the issued certificate verifies against the root
	let leaf_pem = pem::parse(&issued.cert_pem).unwrap();
	let (_, leaf) = X509Certificate::from_der(leaf_pem.contents()).unwrap();
	let root_pem = pem::parse(paths.load_root_cert_pem().unwrap()).unwrap();
	let (_, root) = X509Certificate::from_der(root_pem.contents()).unwrap();
	assert!(leaf.verify_signature(Some(root.public_key())).is_ok());
	assert!(root.verify_signature(None).is_ok());
	assert!(root.is_ca());
	assert!(!leaf.is_ca());

	// the leaf's authority key identifier points at the root's subject key id
	let root_ski = root
		.iter_extensions()
		.find_map(|ext| match ext.parsed_extension() {
			x509_parser::prelude::ParsedExtension::SubjectKeyIdentifier(id) => Some(id.0.to_vec()),
			_ => None,
		})
		.unwrap();
	let leaf_aki = leaf
		.iter_extensions()
		.find_map(|ext| match ext.parsed_extension() {
			x509_parser::prelude::ParsedExtension::AuthorityKeyIdentifier(aki) => {
				aki.key_identifier.as_ref().map(|id| id.0.to_vec())
			},
			_ => None,
		})
		.unwrap();
	assert_eq!(leaf_aki, root_ski);
}

#[test]
fn issued_keys_round_trip_through_the_store() {
	let temp = TempDir::new().unwrap();
	let paths = CaPaths::new(temp.path());
	let root_key = bootstrap(&paths, None);

	let loaded = load_root_key(&paths, &certmint::NoPrompt).unwrap();
	assert_eq!(
		loaded.public_key_der().unwrap(),
		root_key.public_key_der().unwrap()
	);
}

#[test]
fn encrypted_root_keys_prompt_and_decrypt() {
	let temp = TempDir::new().unwrap();
	let paths = CaPaths::new(temp.path());
	let root_key = bootstrap(&paths, Some("correct horse"));

	assert!(certmint::is_encrypted_pem(&paths.load_root_key_pem().unwrap()).unwrap());

	// headless loading fails without a prompt
	assert!(load_root_key(&paths, &certmint::NoPrompt).is_err());

	let prompt = |_: &str| -> std::io::Result<String> { Ok("correct horse".to_string()) };
	let loaded = load_root_key(&paths, &prompt).unwrap();
	assert_eq!(
		loaded.public_key_der().unwrap(),
		root_key.public_key_der().unwrap()
	);

	let wrong = |_: &str| -> std::io::Result<String> { Ok("wrong battery staple".to_string()) };
	assert!(matches!(
		load_root_key(&paths, &wrong),
		Err(certmint::Error::Decryption)
	));
}

#[test]
fn certificate_info_reads_back_what_was_issued() {
	let temp = TempDir::new().unwrap();
	let paths = CaPaths::new(temp.path());
	let root_key = bootstrap(&paths, None);
	let issuer = Issuer::new(&paths.load_root_cert_pem().unwrap(), &root_key).unwrap();

	issue_host(
		&paths,
		&issuer,
		"192.168.1.1",
		&[],
		Subject::default(),
		2048,
		30,
	)
	.unwrap();

	let info =
		CertificateInfo::from_pem(&paths.load_host_cert_pem("192.168.1.1").unwrap()).unwrap();
	// an IP request keeps the textual common name but gets an IP alt name
	assert_eq!(info.subject.common_name, "192.168.1.1");
	assert!(info.dns_names.is_empty());
	assert_eq!(info.ip_addresses, vec!["192.168.1.1".parse::<std::net::IpAddr>().unwrap()]);
	assert_eq!(info.lifetime_days(), 30);
}
