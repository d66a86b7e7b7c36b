use chrono::{Duration, NaiveTime, Utc};
use rollbook_db::{
    Class, Demographic, DemographicId, LookupTable, MIGRATIONS, Position, Semester, Store,
    StoreOptions, Student, UserAccount,
};

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn add_student(store: &Store, username: &str) -> Student {
    let user = UserAccount::new(username, username, "Student");
    store.create_user(&user).unwrap();
    let student = Student::new(user.id);
    store.create_student(&student).unwrap();
    student
}

#[test]
fn reopening_a_database_keeps_rows_and_skips_applied_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollbook.db");

    let student = {
        let store = Store::open(&path).unwrap();
        add_student(&store, "persisted")
    };

    let store = Store::open(&path).unwrap();
    let status = store.migration_status().unwrap();
    assert!(status.is_up_to_date());
    assert_eq!(status.applied.len(), MIGRATIONS.len());
    assert!(store.get_student(student.id).unwrap().is_some());

    let days = store.list_lookup(LookupTable::Day).unwrap();
    assert_eq!(days.len(), 7, "weekday seed must not be applied twice");
}

#[test]
fn duplicate_class_section_example() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("classes.db")).unwrap();
    let admin = UserAccount::new("admin", "Ada", "Admin");
    store.create_user(&admin).unwrap();

    let make = |year| {
        Class::new("Algebra I", admin.id, 1, hm(8, 0), hm(8, 50))
            .semester(Semester::Fall)
            .year(year)
    };

    store.create_class(&make(2024), &[1, 3, 5]).unwrap();
    let err = store.create_class(&make(2024), &[1, 3, 5]).unwrap_err();
    assert!(err.is_unique_violation(), "got {err}");
    store.create_class(&make(2025), &[2, 4]).unwrap();
}

#[test]
fn deleting_a_student_cascades_only_to_their_rows() {
    let store = Store::in_memory().unwrap();
    let gender = store.add_lookup(LookupTable::Gender, "Female").unwrap();
    let grade = store.add_lookup(LookupTable::GradeYear, "Junior").unwrap();
    let race = store.add_lookup(LookupTable::Race, "Asian").unwrap();
    let eth = store.add_lookup(LookupTable::Ethnicity, "Not Hispanic").unwrap();

    let admin = UserAccount::new("admin", "Ada", "Admin");
    store.create_user(&admin).unwrap();
    let class = Class::new("Biology", admin.id, 1, hm(10, 0), hm(11, 0));
    store.create_class(&class, &[]).unwrap();

    let students: Vec<Student> = (0..3).map(|i| add_student(&store, &format!("s{i}"))).collect();
    for s in &students {
        store
            .create_demographic(&Demographic {
                id: DemographicId::new(),
                student_id: s.id,
                age: 18,
                gender_id: gender,
                grade_year_id: grade,
                ethnicity_id: eth,
                race_id: race,
                major: "Undeclared".into(),
            })
            .unwrap();
        store.record_position(&Position::new(s.id, 3.0, 4.0)).unwrap();
        store.enroll(s.id, class.id).unwrap();
    }

    store.delete_student(students[1].id).unwrap();

    let counts = store.table_counts().unwrap();
    let rows = |table: &str| counts.iter().find(|c| c.table == table).unwrap().rows;
    assert_eq!(rows("students"), 2);
    assert_eq!(rows("demographics"), 2);
    assert_eq!(rows("positions"), 2);
    assert_eq!(rows("class_enrollments"), 2);
    assert_eq!(rows("users"), 4, "the owning account is not removed");

    for kept in [&students[0], &students[2]] {
        assert!(store.demographic_for_student(kept.id).unwrap().is_some());
        assert!(store.latest_position(kept.id).unwrap().is_some());
    }
}

#[test]
fn session_lifetime_is_configurable_and_overridable() {
    let store = Store::in_memory_with(StoreOptions {
        session_ttl: Duration::hours(24),
        ..StoreOptions::default()
    })
    .unwrap();
    let user = UserAccount::new("u", "U", "Ser");
    store.create_user(&user).unwrap();

    let default = store.create_session(user.id).unwrap();
    assert_eq!(default.expires_at - default.created_at, Duration::hours(24));

    let mut custom = rollbook_db::Session::new(user.id, Duration::minutes(30)).unwrap();
    custom.expires_at = custom.created_at + Duration::days(7);
    store.insert_session(&custom).unwrap();
    let loaded = store.get_session(custom.id).unwrap().unwrap();
    assert_eq!(loaded.expires_at - loaded.created_at, Duration::days(7));
    assert!(!loaded.is_expired(Utc::now()));
}
