//! Integration tests for the farmacias engine
//!
//! These run against the public API over the in-memory store and the fixture
//! snapshot, with external geocoding disabled.

use std::sync::Arc;

use farmacias::{
    CommuneSearchParams, CoordinateSearchParams, Embedder, FinderConfigBuilder, GeocodeMethod,
    MatchMethod, PharmacyFinder, RadiusPolicy,
    data::{
        GeoPoint, InMemoryPharmacyStore, Pharmacy,
        test_data::{pharmacies_north_of, sample_corpus, sample_pharmacies, sample_store},
    },
    normalize,
};

fn setup_test_env() {
    let _ = farmacias::init_logging(tracing::Level::WARN);
}

async fn finder_over(store: InMemoryPharmacyStore) -> PharmacyFinder {
    PharmacyFinder::builder(Arc::new(store))
        .corpus(sample_corpus())
        .config(
            FinderConfigBuilder::offline()
                .build()
                .expect("Offline config should validate"),
        )
        .build()
        .await
        .expect("Should build finder")
}

/// Bag-of-letters vectors: anagrams embed identically.
#[derive(Debug)]
struct AnagramEmbedder;

impl Embedder for AnagramEmbedder {
    fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0_f32; 26];
                for c in normalize(text).chars().filter(char::is_ascii_lowercase) {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        26
    }

    fn model_name(&self) -> &str {
        "anagram"
    }
}

#[tokio::test]
async fn test_full_workflow() {
    setup_test_env();
    let finder = finder_over(sample_store()).await;

    // 1. Exact match
    let exact = finder.match_commune("Santiago");
    assert_eq!(exact.method, MatchMethod::Exact);
    assert!((exact.confidence - 1.0).abs() < f64::EPSILON);
    assert_eq!(exact.matched_commune, "Santiago");

    // 2. Typo recovery never commits to an unrelated commune
    let typo = finder.match_commune("kilpue");
    assert!(
        typo.matched_commune == "Quilpué"
            || typo.suggestions.iter().any(|s| s == "Quilpué"),
        "kilpue should lead to Quilpué, got {typo:?}"
    );

    // 3. Commune search through a misspelling
    let by_commune = finder
        .search_by_commune("villa alemna", CommuneSearchParams::default())
        .await
        .expect("Commune search should work");
    assert_eq!(by_commune.commune.as_deref(), Some("Villa Alemana"));
    assert_eq!(by_commune.total, 2);

    // 4. Coordinate search around Valparaíso
    let nearby = finder
        .search_by_coordinates(-33.0472, -71.6127, CoordinateSearchParams::default())
        .await
        .expect("Coordinate search should work");
    assert!(!nearby.pharmacies.is_empty());
    assert!(nearby.pharmacies[0].pharmacy.is_on_duty);
    let location = nearby.location.expect("Location should be attempted");
    assert_eq!(location.commune.as_deref(), Some("Valparaíso"));

    // 5. Reverse geocoding alone
    let info = finder.reverse_geocode(-38.7359, -72.5904).await;
    assert_eq!(info.method, GeocodeMethod::LocalDatabase);
    assert_eq!(info.commune.as_deref(), Some("Temuco"));
}

#[tokio::test]
async fn test_rural_radius_expansion() {
    setup_test_env();
    let origin = GeoPoint::new(-37.2, -72.9);
    let mut pharmacies = sample_pharmacies();
    pharmacies.extend(pharmacies_north_of(origin, 18.0, 6, "RU", "Santa Juana"));
    let finder = finder_over(InMemoryPharmacyStore::new(pharmacies)).await;

    let result = finder
        .search_by_coordinates(origin.lat, origin.lng, CoordinateSearchParams::default())
        .await
        .expect("Coordinate search should work");

    let radii = result.attempts.iter().map(|a| a.radius_km).collect::<Vec<_>>();
    assert_eq!(radii, vec![10.0, 15.0, 20.0]);
    assert!((result.radius_used_km - 20.0).abs() < f64::EPSILON);
    assert!(result.expanded);
    assert_eq!(result.pharmacies.len(), 6);
    assert!(result.message.contains("expandiendo la búsqueda a 20km (iniciado con 10km)"));
}

#[tokio::test]
async fn test_invalid_coordinates_are_not_errors() {
    setup_test_env();
    let finder = finder_over(sample_store()).await;
    let result = finder
        .search_by_coordinates(0.0, 0.0, CoordinateSearchParams::default())
        .await
        .expect("Invalid input is reported in the response");
    assert!(result.attempts.is_empty());
    assert!(result.pharmacies.is_empty());
    assert_eq!(
        result.message,
        "Se requieren coordenadas válidas (latitud y longitud)"
    );
}

#[tokio::test]
async fn test_duty_search_fallback() {
    setup_test_env();
    let finder = finder_over(sample_store()).await;
    let result = finder
        .search_by_commune(
            "santiago",
            CommuneSearchParams {
                duty_only: true,
                ..CommuneSearchParams::default()
            },
        )
        .await
        .expect("Commune search should work");
    assert!(result.pharmacies.is_empty());
    let fallback = result.duty_fallback.expect("Fallback expected");
    assert_eq!(fallback.total_regular, 4);
    assert!(fallback.suggestion.contains("4 farmacias regulares"));
}

#[tokio::test]
async fn test_custom_radius_policy() {
    setup_test_env();
    let origin = GeoPoint::new(-37.2, -72.9);
    let store = InMemoryPharmacyStore::new(pharmacies_north_of(origin, 30.0, 2, "X", "Lejos"));
    let config = FinderConfigBuilder::offline()
        .radius_policy(RadiusPolicy {
            ladder_tail_km: vec![20.0, 40.0],
            ..RadiusPolicy::default()
        })
        .build()
        .expect("Policy should validate");
    let finder = PharmacyFinder::builder(Arc::new(store))
        .config(config)
        .build()
        .await
        .expect("Should build finder");

    let result = finder
        .search_by_coordinates(origin.lat, origin.lng, CoordinateSearchParams::default())
        .await
        .expect("Coordinate search should work");
    let radii = result.attempts.iter().map(|a| a.radius_km).collect::<Vec<_>>();
    assert_eq!(radii, vec![10.0, 20.0, 40.0]);
    assert_eq!(result.pharmacies.len(), 2);
}

#[tokio::test]
async fn test_embedding_stage() {
    setup_test_env();
    let finder = PharmacyFinder::builder(Arc::new(sample_store()))
        .corpus(sample_corpus())
        .config(FinderConfigBuilder::offline().build().expect("valid"))
        .embedder(Arc::new(AnagramEmbedder))
        .build()
        .await
        .expect("Should build finder");

    let overview = finder.overview().await.expect("Store is available");
    assert!(overview.embeddings);

    let result = finder.match_commune("ocumet");
    assert_eq!(result.method, MatchMethod::Embedding);
    assert_eq!(result.matched_commune, "Temuco");
}

#[tokio::test]
async fn test_concurrent_requests() {
    setup_test_env();
    let finder = Arc::new(finder_over(sample_store()).await);
    let queries = ["Quilpué", "Maipu", "las condes", "Antofagasta", "Concon"];

    let handles = queries
        .into_iter()
        .map(|q| {
            let finder = Arc::clone(&finder);
            tokio::spawn(async move {
                finder
                    .search_by_commune(q, CommuneSearchParams::default())
                    .await
                    .map(|r| r.commune)
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        let commune = handle
            .await
            .expect("Task should not panic")
            .expect("Search should work");
        assert!(commune.is_some());
    }
}

#[tokio::test]
async fn test_snapshot_refresh() {
    setup_test_env();
    let store = sample_store();
    let finder = finder_over(store.clone()).await;
    store
        .replace_all(vec![
            Pharmacy::new("N-1", "Nueva", "Quilpué").at(-33.05, -71.44),
        ])
        .expect("Store lock should be healthy");

    // Searches read the store directly
    let result = finder
        .search_by_commune("Quilpué", CommuneSearchParams::default())
        .await
        .expect("Commune search should work");
    assert_eq!(result.total, 1);

    finder.rebuild().await.expect("Rebuild should work");
    let overview = finder.overview().await.expect("Store is available");
    assert_eq!(overview.pharmacies.total, 1);
    assert_eq!(overview.centroids, 0);
}
