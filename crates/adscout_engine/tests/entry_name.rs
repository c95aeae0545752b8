use adscout_engine::{resource_id_for_url, version_entry_name, MAX_ENTRY_NAME_LEN};

const FORBIDDEN: &[char] = &[';', '/', '\\', ':', '*', '?', '"', '<', '>', '|', ' '];

fn assert_safe(name: &str) {
    assert!(!name.is_empty());
    assert!(name.len() <= MAX_ENTRY_NAME_LEN, "{name} is too long");
    assert!(name.is_ascii(), "{name} is not ascii");
    assert!(
        !name.contains(FORBIDDEN),
        "{name} contains a forbidden character"
    );
}

#[test]
fn awkward_urls_produce_safe_names() {
    let urls = [
        "https://ads.example.pl/",
        "https://ads.example.pl/oferta/mieszkanie-3-pokoje?id=5&sort=price#gallery",
        "https://ads.example.pl/kraków/żółte-mieszkanie.html",
        "https://ads.example.pl/a:b*c?d\"e<f>g|h",
        "https://ads.example.pl/very/long/path/with/a/descriptive/slug/that/goes/on/and/on/and/never/stops/listing-of-flats-for-rent-near-the-river.html",
        "https://ads.example.pl/x;y=1/plik;v2.pdf",
        "https://ads.example.pl/CON",
        "https://ads.example.pl/%20%20/",
    ];
    for url in urls {
        for ordinal in [0, 7, 99_999] {
            assert_safe(&version_entry_name(url, ordinal));
        }
    }
}

#[test]
fn names_start_with_the_ordinal_and_keep_short_extensions() {
    let name = version_entry_name("https://ads.example.pl/oferta/dom.html", 3);
    assert!(name.starts_with("00003-"), "{name}");
    assert!(name.ends_with(".html"), "{name}");

    let name = version_entry_name("https://ads.example.pl/.html", 0);
    assert!(name.starts_with("00000-index-"), "{name}");
    assert!(name.ends_with(".html"), "{name}");

    let name = version_entry_name("https://ads.example.pl/plik.verylongextension", 0);
    assert!(!name.ends_with(".verylongextension"), "{name}");
}

#[test]
fn names_differ_per_url_and_per_ordinal() {
    let a = version_entry_name("https://ads.example.pl/oferta?id=1", 0);
    let b = version_entry_name("https://ads.example.pl/oferta?id=2", 0);
    let c = version_entry_name("https://ads.example.pl/oferta?id=1", 1);
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, version_entry_name("https://ads.example.pl/oferta?id=1", 0));
}

#[test]
fn resource_ids_are_stable_and_positive() {
    let url = "https://ads.example.pl/oferta/1";
    assert_eq!(resource_id_for_url(url), resource_id_for_url(url));
    assert_ne!(
        resource_id_for_url(url),
        resource_id_for_url("https://ads.example.pl/oferta/2")
    );
    for i in 0..50 {
        assert!(resource_id_for_url(&format!("https://x.pl/{i}")) >= 0);
    }
}
