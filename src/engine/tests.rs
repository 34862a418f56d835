use chrono::{NaiveDate, NaiveTime};

use super::*;
use crate::effects::Effect;
use crate::limits::*;
use crate::ports::InMemoryGuestDirectory;
use crate::validation::RoomRequest;

fn d(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, month, day).unwrap()
}

/// Instant at `hour`:00 on `day`.
fn at(day: NaiveDate, hour: u32) -> Ms {
    instant_at(day, NaiveTime::from_hms_opt(hour, 0, 0).unwrap())
}

fn stay(check_in: NaiveDate, check_out: NaiveDate) -> StayRange {
    StayRange::new(check_in, check_out)
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomturn_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(path.with_extension("wal.compact"));
    path
}

fn open_engine(path: PathBuf) -> Engine {
    Engine::new(path, Settings::default(), Arc::new(InMemoryGuestDirectory::new())).unwrap()
}

fn deluxe() -> RoomType {
    RoomType {
        id: Ulid::new(),
        category: "Deluxe".into(),
        nightly_rate: 10_000,
        tax_rate_bp: 1_200,
        capacity: 2,
        extra_guest_charge: 1_500,
    }
}

/// Engine with one room type and units 101, 102, 103.
async fn hotel(name: &str) -> (Engine, RoomType) {
    let engine = open_engine(test_wal_path(name));
    let room_type = deluxe();
    engine.create_room_type(room_type.clone()).await.unwrap();
    for unit in ["101", "102", "103"] {
        engine.create_room_unit(unit, room_type.id).await.unwrap();
    }
    (engine, room_type)
}

fn guest() -> GuestDetails {
    GuestDetails {
        name: "Ada Lovelace".into(),
        email: "ada@example.com".into(),
        phone: "+44 20 7946 0000".into(),
        id_document: None,
    }
}

fn rooms(room_type: &RoomType, units: &[&str]) -> Vec<RoomRequest> {
    units
        .iter()
        .map(|u| RoomRequest {
            room_type: room_type.id,
            unit: u.to_string(),
            guests: GuestCount::new(2, 0),
        })
        .collect()
}

fn request(room_type: &RoomType, units: &[&str], range: StayRange) -> NewBooking {
    NewBooking {
        guest: guest(),
        stay: range,
        rooms: rooms(room_type, units),
        settlement: Settlement::default(),
        documents: Vec::new(),
        notes: None,
    }
}

async fn book(engine: &Engine, room_type: &RoomType, units: &[&str], range: StayRange) -> Booking {
    engine
        .create_booking(request(room_type, units, range), at(d(6, 1), 12))
        .await
        .unwrap()
        .booking
}

/// Active financial year 2030 starting from sequence 0.
async fn with_invoicing(engine: &Engine) {
    let mut settings = engine.settings().await;
    settings.invoice_format.active_year = Some(2030);
    engine.update_settings(settings).await.unwrap();
    engine.open_financial_year(2030, 0).await.unwrap();
}

fn references(records: &[OccupancyRecord]) -> Vec<&str> {
    records.iter().map(|r| r.reference.as_str()).collect()
}

/// No two booked or checked-in stays on a unit share a night.
fn assert_no_double_booking(records: &[OccupancyRecord]) {
    let stays: Vec<(&str, StayRange)> = records
        .iter()
        .filter_map(|r| match &r.claim {
            Claim::Stay { range, .. } => Some((r.reference.as_str(), *range)),
            _ => None,
        })
        .collect();
    for (i, (a, ra)) in stays.iter().enumerate() {
        for (b, rb) in &stays[i + 1..] {
            assert!(!ra.overlaps(rb), "{a} {ra} overlaps {b} {rb}");
        }
    }
}

// ── Availability and allocation ──────────────────────────

#[tokio::test]
async fn touching_stays_do_not_overlap() {
    let (engine, rt) = hotel("touching_stays.wal").await;
    book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;

    assert!(!engine.is_available("101", &stay(d(6, 11), d(6, 13))).await.unwrap());
    assert!(engine.is_available("101", &stay(d(6, 12), d(6, 14))).await.unwrap());
    assert!(engine.is_available("101", &stay(d(6, 8), d(6, 10))).await.unwrap());
    assert!(engine.is_available("102", &stay(d(6, 10), d(6, 12))).await.unwrap());
}

#[tokio::test]
async fn inverted_ranges_are_rejected_by_queries() {
    let (engine, rt) = hotel("inverted_range.wal").await;
    let inverted = StayRange {
        check_in: d(6, 12),
        check_out: d(6, 10),
    };
    assert!(matches!(
        engine.is_available("101", &inverted).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.find_available_units(rt.id, &inverted).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn allocate_then_release() {
    let (engine, _) = hotel("allocate_release.wal").await;
    let range = stay(d(7, 1), d(7, 4));
    engine.allocate("101", "EXT-1", range, GuestCount::new(1, 0)).await.unwrap();
    assert!(!engine.is_available("101", &range).await.unwrap());

    let err = engine
        .allocate("101", "EXT-2", stay(d(7, 3), d(7, 5)), GuestCount::new(1, 0))
        .await
        .unwrap_err();
    let report = err.conflict_report().unwrap();
    assert_eq!(report.conflicts[0].unit, "101");
    assert_eq!(report.conflicts[0].dates, vec![d(7, 3)]);
    assert_eq!(report.alternatives[0].free_days.first(), Some(&d(7, 4)));

    let released = engine.release("101", "EXT-1").await.unwrap();
    assert_eq!(released.map(|r| r.reference), Some("EXT-1".to_string()));
    assert!(engine.is_available("101", &range).await.unwrap());
    assert!(engine.release("101", "EXT-1").await.unwrap().is_none());
}

#[tokio::test]
async fn allocate_unknown_unit_is_not_found() {
    let (engine, _) = hotel("allocate_unknown.wal").await;
    let err = engine
        .allocate("999", "EXT-1", stay(d(7, 1), d(7, 2)), GuestCount::new(1, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "room unit", .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_exactly_one_wins() {
    let (engine, _) = hotel("concurrent_allocate.wal").await;
    let engine = Arc::new(engine);
    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .allocate("101", &format!("EXT-{i}"), stay(d(8, 1), d(8, 3)), GuestCount::new(1, 0))
                .await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert!(matches!(e, EngineError::Conflict(_)), "unexpected: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.occupancy("101").await.unwrap().len(), 1);
}

#[tokio::test]
async fn find_available_units_by_type() {
    let (engine, rt) = hotel("find_available.wal").await;
    let suite = RoomType {
        category: "Suite".into(),
        ..deluxe()
    };
    engine.create_room_type(suite.clone()).await.unwrap();
    engine.create_room_unit("201", suite.id).await.unwrap();
    book(&engine, &rt, &["102"], stay(d(6, 10), d(6, 12))).await;

    let free = engine.find_available_units(rt.id, &stay(d(6, 11), d(6, 13))).await.unwrap();
    assert_eq!(free, vec!["101".to_string(), "103".to_string()]);
    let suites = engine.find_available_units(suite.id, &stay(d(6, 11), d(6, 13))).await.unwrap();
    assert_eq!(suites, vec!["201".to_string()]);
}

#[tokio::test]
async fn catalog_rejects_duplicates_and_unknown_types() {
    let (engine, rt) = hotel("catalog.wal").await;
    assert!(matches!(
        engine.create_room_type(rt.clone()).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(
        engine.create_room_unit("101", rt.id).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(
        engine.create_room_unit("301", Ulid::new()).await,
        Err(EngineError::NotFound { .. })
    ));
    let long = "9".repeat(MAX_UNIT_ID_LEN + 1);
    assert!(matches!(
        engine.create_room_unit(&long, rt.id).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(engine.room_units().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unit_creation_keeps_the_first_unit() {
    let (engine, rt) = hotel("concurrent_units.wal").await;
    let engine = Arc::new(engine);
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let room_type = rt.id;
        handles.push(tokio::spawn(async move { engine.create_room_unit("201", room_type).await }));
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert!(matches!(e, EngineError::AlreadyExists(_)), "unexpected: {e}"),
        }
    }
    assert_eq!(ok, 1);

    engine
        .allocate("201", "EXT-1", stay(d(8, 1), d(8, 3)), GuestCount::new(1, 0))
        .await
        .unwrap();
    assert!(engine.create_room_unit("201", rt.id).await.is_err());
    assert_eq!(engine.occupancy("201").await.unwrap().len(), 1);

    let suite = RoomType {
        id: Ulid::new(),
        category: "Suite".into(),
        ..deluxe()
    };
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let suite = suite.clone();
        handles.push(tokio::spawn(async move { engine.create_room_type(suite).await }));
    }
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.room_types().len(), 2);
}

#[tokio::test]
async fn catalog_and_settings_reject_unpriceable_values() {
    let (engine, rt) = hotel("price_caps.wal").await;
    let pricey = RoomType {
        id: Ulid::new(),
        nightly_rate: 10_000_000_000_000_000,
        tax_rate_bp: 1_800,
        ..deluxe()
    };
    assert!(matches!(
        engine.create_room_type(pricey).await,
        Err(EngineError::LimitExceeded(_))
    ));
    let taxed = RoomType {
        id: Ulid::new(),
        tax_rate_bp: MAX_TAX_RATE_BP + 1,
        ..deluxe()
    };
    assert!(matches!(
        engine.create_room_type(taxed).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let mut settings = engine.settings().await;
    settings.weekend_hike_percent = 50_000_000;
    assert!(matches!(
        engine.update_settings(settings).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(engine.settings().await.weekend_hike_percent, 0);

    // Bookings still price with the stored values.
    let b = book(&engine, &rt, &["101"], stay(d(6, 14), d(6, 16))).await;
    assert_eq!(b.total(), 22_400);
}

// ── Booking creation ─────────────────────────────────────

#[tokio::test]
async fn create_booking_prices_each_room() {
    let (engine, rt) = hotel("create_prices.wal").await;
    let mut req = request(&rt, &["101", "102"], stay(d(6, 10), d(6, 12)));
    req.rooms[1].guests = GuestCount::new(2, 1);
    let t = engine.create_booking(req, at(d(6, 1), 12)).await.unwrap();

    assert!(t.changed);
    assert!(matches!(t.effects.as_slice(), [Effect::SendConfirmation { .. }]));
    let b = t.booking;
    assert_eq!(b.status, BookingStatus::Booked);
    assert_eq!(b.reference, Booking::reference_for(b.id));
    // Mon and Tue nights, no hike.
    assert_eq!(b.rooms[0].price.subtotal, 20_000);
    assert_eq!(b.rooms[0].price.tax, 2_400);
    assert_eq!(b.rooms[0].price.total, 22_400);
    // One guest above capacity, two nights.
    assert_eq!(b.rooms[1].price.extra_guests, 1);
    assert_eq!(b.rooms[1].price.subtotal, 23_000);
    assert_eq!(b.rooms[1].price.total, 25_760);
    assert_eq!(b.total(), 48_160);

    assert_eq!(engine.booking_by_reference(&b.reference).await.unwrap(), b);
    for unit in ["101", "102"] {
        let records = engine.occupancy(unit).await.unwrap();
        assert_eq!(references(&records), vec![b.reference.as_str()]);
        assert_eq!(records[0].status(), OccupancyStatus::Booked);
    }
}

#[tokio::test]
async fn create_booking_is_all_or_nothing() {
    let (engine, rt) = hotel("create_atomic.wal").await;
    book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;

    let err = engine
        .create_booking(request(&rt, &["102", "101"], stay(d(6, 11), d(6, 13))), at(d(6, 1), 12))
        .await
        .unwrap_err();
    let report = err.conflict_report().unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].unit, "101");
    assert_eq!(report.conflicts[0].dates, vec![d(6, 11)]);
    assert_eq!(report.alternatives[0].unit, "101");
    assert_eq!(report.alternatives[0].free_days.first(), Some(&d(6, 12)));
    assert_eq!(report.alternatives[0].free_days.len(), FREE_DAY_HORIZON_DAYS as usize - 1);

    assert!(engine.occupancy("102").await.unwrap().is_empty());
    assert_eq!(engine.bookings(None).await.len(), 1);
}

#[tokio::test]
async fn conflict_report_covers_every_taken_room() {
    let (engine, rt) = hotel("create_multi_conflict.wal").await;
    book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    book(&engine, &rt, &["102"], stay(d(6, 11), d(6, 13))).await;

    let err = engine
        .create_booking(request(&rt, &["101", "102", "103"], stay(d(6, 11), d(6, 13))), at(d(6, 1), 12))
        .await
        .unwrap_err();
    let report = err.conflict_report().unwrap();
    let conflicts: Vec<(&str, &[NaiveDate])> = report
        .conflicts
        .iter()
        .map(|c| (c.unit.as_str(), c.dates.as_slice()))
        .collect();
    assert_eq!(
        conflicts,
        vec![("101", &[d(6, 11)][..]), ("102", &[d(6, 11), d(6, 12)][..])]
    );
    let alternatives: Vec<&str> = report.alternatives.iter().map(|a| a.unit.as_str()).collect();
    assert_eq!(alternatives, vec!["101", "102"]);
    assert_eq!(report.alternatives[0].free_days.first(), Some(&d(6, 12)));
    assert_eq!(report.alternatives[1].free_days.first(), Some(&d(6, 13)));

    assert!(engine.occupancy("103").await.unwrap().is_empty());
    assert_eq!(engine.bookings(None).await.len(), 2);
}

#[tokio::test]
async fn create_booking_validates_input() {
    let (engine, rt) = hotel("create_validation.wal").await;
    let now = at(d(6, 1), 12);

    let mut bad_email = request(&rt, &["101"], stay(d(6, 10), d(6, 12)));
    bad_email.guest.email = "not-an-email".into();
    assert!(matches!(
        engine.create_booking(bad_email, now).await,
        Err(EngineError::Validation(_))
    ));

    let mut bad_id = request(&rt, &["101"], stay(d(6, 10), d(6, 12)));
    bad_id.guest.id_document = Some(IdDocument {
        kind: IdKind::Passport,
        number: "123".into(),
    });
    assert!(matches!(
        engine.create_booking(bad_id, now).await,
        Err(EngineError::Validation(_))
    ));

    let no_rooms = request(&rt, &[], stay(d(6, 10), d(6, 12)));
    assert!(matches!(
        engine.create_booking(no_rooms, now).await,
        Err(EngineError::Validation(_))
    ));

    let unknown_unit = request(&rt, &["999"], stay(d(6, 10), d(6, 12)));
    assert!(matches!(
        engine.create_booking(unknown_unit, now).await,
        Err(EngineError::NotFound { .. })
    ));

    let suite = RoomType {
        category: "Suite".into(),
        ..deluxe()
    };
    engine.create_room_type(suite.clone()).await.unwrap();
    let wrong_type = request(&suite, &["101"], stay(d(6, 10), d(6, 12)));
    assert!(matches!(
        engine.create_booking(wrong_type, now).await,
        Err(EngineError::Validation(_))
    ));

    assert!(engine.bookings(None).await.is_empty());
    assert!(engine.occupancy("101").await.unwrap().is_empty());
}

#[tokio::test]
async fn same_guest_keeps_guest_id() {
    let (engine, rt) = hotel("guest_id.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    let b = book(&engine, &rt, &["102"], stay(d(6, 10), d(6, 12))).await;
    assert_eq!(a.guest_id, b.guest_id);
}

// ── Edits ────────────────────────────────────────────────

#[tokio::test]
async fn extension_only_checks_added_nights() {
    let (engine, rt) = hotel("edit_extend.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    let later = book(&engine, &rt, &["101"], stay(d(6, 14), d(6, 16))).await;

    let extend = BookingEdit {
        stay: Some(stay(d(6, 10), d(6, 14))),
        ..Default::default()
    };
    let t = engine.edit_booking(a.id, extend, at(d(6, 2), 9)).await.unwrap();
    assert_eq!(t.booking.stay, stay(d(6, 10), d(6, 14)));
    assert_eq!(t.booking.rooms[0].price.nights, 4);
    let records = engine.occupancy("101").await.unwrap();
    assert_eq!(references(&records), vec![a.reference.as_str(), later.reference.as_str()]);
    assert_eq!(records[0].check_out(), Some(d(6, 14)));

    let too_far = BookingEdit {
        stay: Some(stay(d(6, 10), d(6, 15))),
        ..Default::default()
    };
    let err = engine.edit_booking(a.id, too_far, at(d(6, 2), 9)).await.unwrap_err();
    let report = err.conflict_report().unwrap();
    assert_eq!(report.conflicts[0].dates, vec![d(6, 14)]);
    let alt = &report.alternatives[0];
    assert!(alt.free_days.contains(&d(6, 12)));
    assert!(!alt.free_days.contains(&d(6, 14)));
    assert!(alt.free_days.contains(&d(6, 16)));

    // The failed edit changed nothing.
    assert_eq!(engine.booking(a.id).await.unwrap().stay, stay(d(6, 10), d(6, 14)));
}

#[tokio::test]
async fn edit_rechecks_nights_no_longer_held() {
    let (engine, rt) = hotel("edit_after_release.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    engine.release("101", &a.reference).await.unwrap();
    let b = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;

    let extend = BookingEdit {
        stay: Some(stay(d(6, 10), d(6, 14))),
        ..Default::default()
    };
    let err = engine.edit_booking(a.id, extend, at(d(6, 2), 9)).await.unwrap_err();
    let report = err.conflict_report().unwrap();
    assert_eq!(report.conflicts[0].unit, "101");
    assert_eq!(report.conflicts[0].dates, vec![d(6, 10), d(6, 11)]);
    let records = engine.occupancy("101").await.unwrap();
    assert_eq!(references(&records), vec![b.reference.as_str()]);

    // Nights nobody holds can be claimed again.
    let after = BookingEdit {
        stay: Some(stay(d(6, 12), d(6, 14))),
        ..Default::default()
    };
    engine.edit_booking(a.id, after, at(d(6, 2), 10)).await.unwrap();
    let records = engine.occupancy("101").await.unwrap();
    assert_eq!(references(&records), vec![b.reference.as_str(), a.reference.as_str()]);
    assert_no_double_booking(&records);
}

#[tokio::test]
async fn edit_with_same_dates_keeps_price_snapshot() {
    let (engine, rt) = hotel("edit_same_dates.wal").await;
    // Fri and Sat nights.
    let a = book(&engine, &rt, &["101"], stay(d(6, 14), d(6, 16))).await;
    assert_eq!(a.total(), 22_400);

    let mut settings = engine.settings().await;
    settings.weekend_hike_percent = 50;
    engine.update_settings(settings).await.unwrap();

    let edit = BookingEdit {
        stay: Some(a.stay),
        rooms: Some(rooms(&rt, &["101"])),
        notes: Some("early check-in requested".into()),
        ..Default::default()
    };
    let t = engine.edit_booking(a.id, edit, at(d(6, 2), 9)).await.unwrap();
    assert_eq!(t.booking.rooms, a.rooms);
    assert_eq!(t.booking.total(), 22_400);
    assert_eq!(t.booking.notes.as_deref(), Some("early check-in requested"));
    let held = OccupancyRecord::stay(a.reference.clone(), a.stay, GuestCount::new(2, 0));
    assert_eq!(engine.occupancy("101").await.unwrap(), vec![held]);

    // A real date change picks up the new weekend rate.
    let longer = BookingEdit {
        stay: Some(stay(d(6, 14), d(6, 17))),
        ..Default::default()
    };
    let t = engine.edit_booking(a.id, longer, at(d(6, 2), 10)).await.unwrap();
    assert_eq!(t.booking.rooms[0].price.subtotal, 10_000 + 2 * 15_000);
    assert_eq!(t.booking.total(), 44_800);
}

#[tokio::test]
async fn edit_moves_booking_between_rooms() {
    let (engine, rt) = hotel("edit_move.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    engine.check_in(a.id, at(d(6, 10), 15)).await.unwrap();

    let edit = BookingEdit {
        rooms: Some(rooms(&rt, &["102"])),
        notes: Some("moved for noise".into()),
        ..Default::default()
    };
    let t = engine.edit_booking(a.id, edit, at(d(6, 10), 20)).await.unwrap();
    assert_eq!(t.booking.units().collect::<Vec<_>>(), vec!["102"]);
    assert_eq!(t.booking.notes.as_deref(), Some("moved for noise"));
    assert_eq!(t.booking.status, BookingStatus::CheckedIn);

    assert!(engine.occupancy("101").await.unwrap().is_empty());
    let records = engine.occupancy("102").await.unwrap();
    assert_eq!(records[0].reference, a.reference);
    assert_eq!(records[0].status(), OccupancyStatus::CheckIn);
}

#[tokio::test]
async fn edit_into_taken_room_reports_conflict() {
    let (engine, rt) = hotel("edit_taken.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    book(&engine, &rt, &["102"], stay(d(6, 11), d(6, 13))).await;

    let edit = BookingEdit {
        rooms: Some(rooms(&rt, &["101", "102"])),
        ..Default::default()
    };
    let err = engine.edit_booking(a.id, edit, at(d(6, 2), 9)).await.unwrap_err();
    let report = err.conflict_report().unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].unit, "102");
    assert_eq!(engine.booking(a.id).await.unwrap().rooms.len(), 1);
}

#[tokio::test]
async fn closed_booking_cannot_be_edited() {
    let (engine, rt) = hotel("edit_closed.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    engine.cancel(a.id, at(d(6, 3), 9)).await.unwrap();
    let edit = BookingEdit {
        notes: Some("late request".into()),
        ..Default::default()
    };
    assert!(matches!(
        engine.edit_booking(a.id, edit, at(d(6, 3), 10)).await,
        Err(EngineError::Validation(_))
    ));
}

// ── Transitions ──────────────────────────────────────────

#[tokio::test]
async fn check_in_mirrors_records_and_is_idempotent() {
    let (engine, rt) = hotel("check_in.wal").await;
    let a = book(&engine, &rt, &["101", "102"], stay(d(6, 10), d(6, 12))).await;

    let t = engine.check_in(a.id, at(d(6, 10), 15)).await.unwrap();
    assert!(t.changed);
    assert_eq!(t.booking.status, BookingStatus::CheckedIn);
    assert_eq!(
        t.booking.status_timestamps.get(&BookingStatus::CheckedIn),
        Some(&at(d(6, 10), 15))
    );
    match t.effects.as_slice() {
        [Effect::ConsumeAmenities { reference, units }] => {
            assert_eq!(reference, &a.reference);
            assert_eq!(units.len(), 2);
        }
        other => panic!("unexpected effects: {other:?}"),
    }
    for unit in ["101", "102"] {
        assert_eq!(engine.occupancy(unit).await.unwrap()[0].status(), OccupancyStatus::CheckIn);
    }

    let again = engine.check_in(a.id, at(d(6, 10), 16)).await.unwrap();
    assert!(!again.changed);
    assert!(again.effects.is_empty());
}

#[tokio::test]
async fn cancel_releases_rooms() {
    let (engine, rt) = hotel("cancel.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;

    let t = engine.cancel(a.id, at(d(6, 5), 9)).await.unwrap();
    assert_eq!(t.booking.status, BookingStatus::Cancelled);
    assert!(matches!(t.effects.as_slice(), [Effect::SendCancellation { .. }]));
    assert!(engine.occupancy("101").await.unwrap().is_empty());

    assert!(!engine.cancel(a.id, at(d(6, 5), 10)).await.unwrap().changed);
    let err = engine.check_in(a.id, at(d(6, 10), 15)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::CheckedIn
        }
    ));
}

#[tokio::test]
async fn cancel_after_checkout_changes_nothing() {
    let (engine, rt) = hotel("cancel_after_checkout.wal").await;
    with_invoicing(&engine).await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    engine.check_out(a.id, at(d(6, 12), 10)).await.unwrap();

    let t = engine.cancel(a.id, at(d(6, 12), 11)).await.unwrap();
    assert!(!t.changed);
    assert_eq!(t.booking.status, BookingStatus::CheckedOut);
    // The turnover hold is still there.
    assert_eq!(engine.occupancy("101").await.unwrap().len(), 1);
}

#[tokio::test]
async fn checkout_mints_invoice_and_opens_turnover() {
    let (engine, rt) = hotel("checkout.wal").await;
    with_invoicing(&engine).await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    engine.check_in(a.id, at(d(6, 10), 15)).await.unwrap();

    let now = at(d(6, 12), 10);
    let t = engine.check_out(a.id, now).await.unwrap();
    assert!(t.changed);
    assert!(t.warnings.is_empty());
    assert_eq!(t.booking.invoice_number.as_deref(), Some("INV/2030-31/0001"));
    let invoice = t.invoice.unwrap();
    assert_eq!(invoice.number.as_deref(), Some("INV/2030-31/0001"));
    assert_eq!(invoice.total, a.total());
    assert_eq!(engine.invoice(a.id), Some(invoice));

    let records = engine.occupancy("101").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reference, a.reference);
    assert_eq!(records[0].status(), OccupancyStatus::Pending);
    assert!(!engine.is_available("101", &stay(d(6, 12), d(6, 13))).await.unwrap());

    let tasks = engine.active_tasks(Some("101")).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].reservation_status, ReservationStatus::CheckOut);
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    assert_eq!(tasks[0].expected_start, now);
    assert_eq!(tasks[0].expected_end, Some(now + 2 * HOUR_MS));

    // A second checkout neither re-mints nor opens another task.
    let again = engine.check_out(a.id, now + HOUR_MS).await.unwrap();
    assert!(!again.changed);
    assert_eq!(engine.current_invoice_sequence().await, 1);
    assert_eq!(engine.active_tasks(Some("101")).await.len(), 1);

    engine.complete_task(tasks[0].id, now + HOUR_MS).await.unwrap();
    assert!(engine.occupancy("101").await.unwrap().is_empty());
    assert!(engine.is_available("101", &stay(d(6, 12), d(6, 13))).await.unwrap());
}

#[tokio::test]
async fn checkout_without_financial_year_is_degraded() {
    let (engine, rt) = hotel("checkout_degraded.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;

    let t = engine.check_out(a.id, at(d(6, 12), 10)).await.unwrap();
    assert!(t.changed);
    assert_eq!(t.booking.status, BookingStatus::CheckedOut);
    assert!(t.booking.invoice_number.is_none());
    assert_eq!(t.warnings.len(), 1);
    assert!(t.invoice.unwrap().number.is_none());
    assert_eq!(engine.active_tasks(Some("101")).await.len(), 1);
    assert_eq!(engine.collect_missing_invoices().await, vec![a.id]);

    with_invoicing(&engine).await;
    let number = engine.backfill_invoice(a.id, at(d(6, 12), 12)).await.unwrap();
    assert_eq!(number.as_deref(), Some("INV/2030-31/0001"));
    assert_eq!(engine.invoice(a.id).unwrap().number, number);
    assert_eq!(engine.booking(a.id).await.unwrap().invoice_number, number);
    assert!(engine.backfill_invoice(a.id, at(d(6, 12), 13)).await.unwrap().is_none());
    assert!(engine.collect_missing_invoices().await.is_empty());
}

// ── Invoice sequence ─────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mints_are_distinct_and_gap_free() {
    let (engine, _) = hotel("mint_concurrent.wal").await;
    with_invoicing(&engine).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.next_invoice_number().await }));
    }
    let mut sequences = Vec::new();
    for handle in handles {
        let number = handle.await.unwrap().unwrap();
        assert!(number.starts_with("INV/2030-31/"));
        sequences.push(number.rsplit('/').next().unwrap().parse::<u64>().unwrap());
    }
    sequences.sort();
    assert_eq!(sequences, (1..=50).collect::<Vec<u64>>());
    assert_eq!(engine.invoice_sequence(2030).await, Some(50));
}

#[tokio::test]
async fn mint_fails_on_misconfiguration() {
    let (engine, _) = hotel("mint_misconfigured.wal").await;
    assert!(matches!(
        engine.next_invoice_number().await,
        Err(EngineError::SequenceAllocation(_))
    ));

    let mut settings = engine.settings().await;
    settings.invoice_format.active_year = Some(2031);
    engine.update_settings(settings.clone()).await.unwrap();
    // Year configured but never opened.
    assert!(matches!(
        engine.next_invoice_number().await,
        Err(EngineError::SequenceAllocation(_))
    ));

    engine.open_financial_year(2031, 41).await.unwrap();
    assert!(matches!(
        engine.open_financial_year(2031, 0).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert_eq!(engine.next_invoice_number().await.unwrap(), "INV/2031-32/0042");

    settings.invoice_format.prefix = "  ".into();
    engine.update_settings(settings).await.unwrap();
    assert!(matches!(
        engine.next_invoice_number().await,
        Err(EngineError::SequenceAllocation(_))
    ));
    assert_eq!(engine.invoice_sequence(2031).await, Some(42));
}

// ── Housekeeping ─────────────────────────────────────────

#[tokio::test]
async fn maintenance_waits_for_last_departure_and_completes_cleanly() {
    let (engine, rt) = hotel("maintenance.wal").await;
    let first = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    let second = book(&engine, &rt, &["101"], stay(d(6, 20), d(6, 22))).await;

    let now = at(d(6, 5), 9);
    let task = engine
        .on_maintenance_requested("101", None, Some("AC repair".into()), now)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Maintenance);
    assert_eq!(task.expected_start, at(d(6, 22), 11));
    assert_eq!(task.reference.as_deref(), Some(format!("MAINT-{now}").as_str()));

    let records = engine.occupancy("101").await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].status(), OccupancyStatus::Maintenance);
    assert!(engine.is_available("101", &stay(d(6, 15), d(6, 17))).await.unwrap());
    assert!(!engine.is_available("101", &stay(d(6, 22), d(6, 23))).await.unwrap());

    let done = engine.complete_task(task.id, at(d(6, 23), 9)).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.actual_end, Some(at(d(6, 23), 9)));
    let records = engine.occupancy("101").await.unwrap();
    assert_eq!(
        references(&records),
        vec![first.reference.as_str(), second.reference.as_str()]
    );

    // Completing again is harmless.
    assert_eq!(engine.complete_task(task.id, at(d(6, 24), 9)).await.unwrap(), done);
}

#[tokio::test]
async fn maintenance_on_idle_room_starts_now() {
    let (engine, _) = hotel("maintenance_idle.wal").await;
    let now = at(d(6, 5), 9);
    let task = engine
        .on_maintenance_requested("103", Some("MAINT-PAINT".into()), None, now)
        .await
        .unwrap();
    assert_eq!(task.expected_start, now);
    assert!(!engine.is_available("103", &stay(d(6, 5), d(6, 6))).await.unwrap());
    assert!(engine.is_available("103", &stay(d(6, 3), d(6, 5))).await.unwrap());

    assert!(matches!(
        engine
            .on_maintenance_requested("103", Some("MAINT-PAINT".into()), None, now)
            .await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn arrival_task_needs_lead_time() {
    let (engine, rt) = hotel("lead_time.wal").await;
    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    let arrives = at(d(6, 10), 14);
    let prep = NewTask {
        unit: "101".into(),
        reference: Some(a.reference.clone()),
        reservation_status: ReservationStatus::Booked,
        notes: Some("extra towels".into()),
    };

    let err = engine.schedule_task(prep.clone(), arrives - HOUR_MS).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::LeadTime {
            remaining_ms: HOUR_MS,
            required_ms: BOOKED_TASK_LEAD_MS
        }
    ));

    let task = engine.schedule_task(prep, arrives - 3 * HOUR_MS).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.reservation_status, ReservationStatus::Booked);

    let wrong_room = NewTask {
        unit: "102".into(),
        reference: Some(a.reference.clone()),
        reservation_status: ReservationStatus::Booked,
        notes: None,
    };
    assert!(matches!(
        engine.schedule_task(wrong_room, arrives - 3 * HOUR_MS).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn deleted_task_leaves_hold_until_released() {
    let (engine, _) = hotel("delete_task.wal").await;
    let task = engine
        .on_maintenance_requested("102", Some("MAINT-AC".into()), None, at(d(6, 5), 9))
        .await
        .unwrap();

    engine.delete_task(task.id).await.unwrap();
    assert!(engine.task(task.id).await.is_none());
    assert!(engine.active_tasks(Some("102")).await.is_empty());
    assert!(!engine.is_available("102", &stay(d(6, 10), d(6, 11))).await.unwrap());

    assert!(engine.release("102", "MAINT-AC").await.unwrap().is_some());
    assert!(engine.is_available("102", &stay(d(6, 10), d(6, 11))).await.unwrap());
    assert!(matches!(
        engine.delete_task(task.id).await,
        Err(EngineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn turnover_task_is_reused_per_departure() {
    let (engine, _) = hotel("turnover_reuse.wal").await;
    let now = at(d(6, 12), 10);
    let first = engine.on_checkout("101", "BK-WALKIN", now).await.unwrap();
    let second = engine.on_checkout("101", "BK-WALKIN", now + HOUR_MS).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(engine.occupancy("101").await.unwrap().len(), 1);

    let started = engine.start_task(first.id, now + 2 * HOUR_MS).await.unwrap();
    assert_eq!(started.status, TaskStatus::InProgress);
    assert_eq!(started.actual_start, Some(now + 2 * HOUR_MS));
    engine.complete_task(first.id, now + 3 * HOUR_MS).await.unwrap();
    assert!(matches!(
        engine.start_task(first.id, now + 4 * HOUR_MS).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn live_settings_shape_new_tasks() {
    let (engine, _) = hotel("live_settings.wal").await;
    let now = at(d(6, 12), 10);
    let mut settings = engine.settings().await;
    settings.housekeeping_buffer_hours = 4;
    engine.update_settings(settings.clone()).await.unwrap();
    let task = engine.on_checkout("101", "BK-A", now).await.unwrap();
    assert_eq!(task.expected_end, Some(now + 4 * HOUR_MS));

    settings.manual_housekeeping_control = true;
    engine.update_settings(settings).await.unwrap();
    let task = engine.on_checkout("102", "BK-B", now).await.unwrap();
    assert_eq!(task.expected_end, None);
}

// ── Persistence ──────────────────────────────────────────

/// State visible through the public API, for before/after comparisons.
async fn observed(engine: &Engine) -> (Vec<Booking>, Vec<Vec<OccupancyRecord>>, Vec<HousekeepingTask>, u64, Settings) {
    let mut occupancy = Vec::new();
    for unit in engine.room_units().await {
        occupancy.push(engine.occupancy(&unit.id).await.unwrap());
    }
    (
        engine.bookings(None).await,
        occupancy,
        engine.active_tasks(None).await,
        engine.current_invoice_sequence().await,
        engine.settings().await,
    )
}

async fn busy_hotel(name: &str) -> (Engine, PathBuf) {
    let path = test_wal_path(name);
    let engine = open_engine(path.clone());
    let rt = deluxe();
    engine.create_room_type(rt.clone()).await.unwrap();
    for unit in ["101", "102", "103"] {
        engine.create_room_unit(unit, rt.id).await.unwrap();
    }
    with_invoicing(&engine).await;

    let a = book(&engine, &rt, &["101"], stay(d(6, 10), d(6, 12))).await;
    let b = book(&engine, &rt, &["102", "103"], stay(d(6, 11), d(6, 14))).await;
    let c = book(&engine, &rt, &["101"], stay(d(6, 20), d(6, 21))).await;
    engine.check_in(a.id, at(d(6, 10), 15)).await.unwrap();
    engine.check_out(a.id, at(d(6, 12), 10)).await.unwrap();
    engine.check_in(b.id, at(d(6, 11), 15)).await.unwrap();
    engine.cancel(c.id, at(d(6, 12), 12)).await.unwrap();
    engine
        .on_maintenance_requested("103", Some("MAINT-1".into()), None, at(d(6, 12), 9))
        .await
        .unwrap();
    (engine, path)
}

#[tokio::test]
async fn replay_restores_state() {
    let (engine, path) = busy_hotel("replay.wal").await;
    let before = observed(&engine).await;
    let invoices: Vec<_> = before.0.iter().filter_map(|b| engine.invoice(b.id)).collect();
    drop(engine);

    let restored = open_engine(path);
    assert_eq!(observed(&restored).await, before);
    let restored_invoices: Vec<_> = before.0.iter().filter_map(|b| restored.invoice(b.id)).collect();
    assert_eq!(restored_invoices, invoices);
    assert_eq!(restored.next_invoice_number().await.unwrap(), "INV/2030-31/0002");
}

#[tokio::test]
async fn compaction_preserves_state() {
    let (engine, path) = busy_hotel("compaction.wal").await;
    assert!(engine.wal_appends_since_compact().await > 0);
    let before = observed(&engine).await;

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    // Appends after compaction land in the compacted log.
    engine.open_financial_year(2031, 0).await.unwrap();
    drop(engine);

    let restored = open_engine(path);
    assert_eq!(observed(&restored).await, before);
    assert_eq!(restored.invoice_sequence(2031).await, Some(0));
    assert_eq!(restored.invoice_sequence(2030).await, Some(1));
}
