use chrono::{Duration, Utc};
use std::sync::Arc;
use tourrec::catalog::{AnalyticsRecord, BookingRecord, InMemoryCatalog, WishlistRecord};
use tourrec::{Config, EngineState, RatingAggregate, Tour, TourStatus};
use uuid::Uuid;

fn tour(id: u128, title: &str, destination: &str, tour_type: &str, tags: &[&str]) -> Tour {
    Tour {
        id: Uuid::from_u128(id),
        title: title.to_string(),
        description: format!("{title}, small groups, local guides"),
        destination: destination.to_string(),
        tour_type: tour_type.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        duration_days: 4,
        base_price: 800.0,
        policy: "free cancellation up to 7 days".to_string(),
        itinerary: vec!["arrival and welcome dinner".to_string()],
        child_age_limit: 6,
        requires_passport: true,
        requires_visa: false,
        status: TourStatus::Approved,
        published_at: Utc::now() - Duration::days(id as i64),
    }
}

async fn seeded_engine() -> (Arc<InMemoryCatalog>, EngineState) {
    let catalog = Arc::new(InMemoryCatalog::new());
    let now = Utc::now();

    catalog.add_tour(tour(1, "Palawan island hopping", "Palawan", "beach", &["island", "snorkel"])).await;
    catalog.add_tour(tour(2, "El Nido lagoons", "Palawan", "beach", &["island", "kayak"])).await;
    catalog.add_tour(tour(3, "Sapa valley trek", "Sapa", "trek", &["hiking", "mountain"])).await;
    catalog.add_tour(tour(4, "Ha Giang loop ride", "Ha Giang", "trek", &["mountain", "motorbike"])).await;
    catalog.add_tour(tour(5, "Hanoi street food walk", "Hanoi", "city", &["food"])).await;
    catalog.add_tour(tour(6, "Hue imperial city", "Hue", "city", &["history"])).await;

    // Alice is a beach person, Bob likes the mountains, Carol eats her way
    // through cities. Everyone's events are recent so decay barely bites.
    let bookings = [
        (100u128, 1u128),
        (100, 2),
        (101, 3),
        (101, 4),
        (102, 5),
    ];
    for (user, tour_id) in bookings {
        catalog
            .record_booking(BookingRecord {
                user_id: Uuid::from_u128(user),
                tour_id: Uuid::from_u128(tour_id),
                booked_at: now - Duration::days(2),
            })
            .await;
    }
    catalog
        .record_wishlist(WishlistRecord {
            user_id: Uuid::from_u128(102),
            tour_id: Uuid::from_u128(6),
            added_at: now - Duration::days(1),
        })
        .await;
    catalog
        .set_rating(RatingAggregate {
            tour_id: Uuid::from_u128(1),
            avg_rating: 4.8,
            rating_count: 24,
        })
        .await;

    let engine = EngineState::new(catalog.clone(), Config::default());
    (catalog, engine)
}

#[tokio::test]
async fn test_full_training_and_serving_flow() {
    let (_catalog, engine) = seeded_engine().await;

    let report = engine.training_service.run().await.unwrap();
    assert_eq!(report.users_trained, 3);
    assert_eq!(report.tours_trained, 6);
    assert_eq!(report.users_refreshed, 3);

    let alice = Uuid::from_u128(100);
    let rec = engine
        .recommendation_service
        .get_recommendations(alice, 10)
        .await
        .unwrap();

    assert!(!rec.entries.is_empty());
    // Alice already booked tours 1 and 2.
    assert!(rec
        .entries
        .iter()
        .all(|e| e.tour_id != Uuid::from_u128(1) && e.tour_id != Uuid::from_u128(2)));
    // Descending scores, every entry explained.
    for pair in rec.entries.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(rec.entries.iter().all(|e| !e.reasons.is_empty()));
}

#[tokio::test]
async fn test_cached_list_is_reused_until_stale() {
    let (catalog, engine) = seeded_engine().await;
    engine.training_service.run().await.unwrap();

    let alice = Uuid::from_u128(100);
    let first = engine
        .recommendation_service
        .get_recommendations(alice, 5)
        .await
        .unwrap();
    let second = engine
        .recommendation_service
        .get_recommendations(alice, 5)
        .await
        .unwrap();
    assert_eq!(first.generated_at, second.generated_at);

    // Two qualifying events after generation force a rebuild.
    for tour_id in [5u128, 6] {
        catalog
            .record_analytics(AnalyticsRecord {
                user_id: Some(alice),
                tour_id: Some(Uuid::from_u128(tour_id)),
                event_name: "tour_view".to_string(),
                occurred_at: Utc::now(),
            })
            .await;
    }
    let third = engine
        .recommendation_service
        .get_recommendations(alice, 5)
        .await
        .unwrap();
    assert!(third.generated_at > first.generated_at);
    // The fresh views now count as interactions and are excluded too.
    assert!(third
        .entries
        .iter()
        .all(|e| e.tour_id != Uuid::from_u128(5) && e.tour_id != Uuid::from_u128(6)));
}

#[tokio::test]
async fn test_cold_user_gets_popular_tours() {
    let (_catalog, engine) = seeded_engine().await;
    engine.training_service.run().await.unwrap();

    let stranger = Uuid::from_u128(999);
    let rec = engine
        .recommendation_service
        .get_recommendations(stranger, 5)
        .await
        .unwrap();

    assert!(!rec.entries.is_empty());
    assert!(rec
        .entries
        .iter()
        .any(|e| e.reasons.contains(&"popular".to_string())));
}

#[tokio::test]
async fn test_similar_tours_prefers_shared_content() {
    let (_catalog, engine) = seeded_engine().await;
    engine.training_service.run().await.unwrap();

    let similar = engine
        .recommendation_service
        .similar_tours(Uuid::from_u128(1), 3)
        .await
        .unwrap();

    assert!(!similar.is_empty());
    assert!(similar.iter().all(|e| e.tour_id != Uuid::from_u128(1)));
    assert!(similar.iter().all(|e| e.score > 0.0 && e.score <= 1.0));
    // The other Palawan beach tour shares the most terms.
    assert_eq!(similar[0].tour_id, Uuid::from_u128(2));
}

#[tokio::test]
async fn test_unapproved_tours_never_surface() {
    let (catalog, engine) = seeded_engine().await;
    let mut draft = tour(50, "Draft expedition", "Palawan", "beach", &["island"]);
    draft.status = TourStatus::Pending;
    catalog.add_tour(draft).await;

    engine.training_service.run().await.unwrap();

    let alice = Uuid::from_u128(100);
    let rec = engine
        .recommendation_service
        .get_recommendations(alice, 10)
        .await
        .unwrap();
    assert!(rec.entries.iter().all(|e| e.tour_id != Uuid::from_u128(50)));

    let similar = engine
        .recommendation_service
        .similar_tours(Uuid::from_u128(1), 10)
        .await
        .unwrap();
    assert!(similar.iter().all(|e| e.tour_id != Uuid::from_u128(50)));
}
