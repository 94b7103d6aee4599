// End-to-end pipeline tests: delimited file -> registries -> vocabulary
// -> model indexes -> ranked queries, all through the public project API
// against temporary directories.

use std::io::Write;
use std::path::PathBuf;

use cardsim::fusion::QueryOutcome;
use cardsim::ingest::{IngestOptions, IngestOutcome};
use cardsim::project::{Project, RELATIONSHIPS_DIMENSION};
use tempfile::TempDir;

fn write_csv(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

/// Loosen the frequency filter so tiny fixtures survive it.
fn loosen_filter(project: &Project, dimension: Option<&str>) {
    let mut corpus = project.corpus(dimension).unwrap();
    corpus
        .update_settings(|s| {
            s.no_below = 1;
            s.no_above = 1.0;
        })
        .unwrap();
}

// ============================================================
// Single-corpus projects
// ============================================================

#[test]
fn ingest_then_query_ranks_the_overlapping_card_first() {
    let dir = TempDir::new().unwrap();
    let file = write_csv(
        &dir,
        "cards.csv",
        "name;city;sector\n\
         Acme;lisboa;steel\n\
         Zenith;lisboa;steel\n\
         Orbit;porto;software\n",
    );
    let project = Project::open(dir.path(), "Companies", None).unwrap();
    loosen_filter(&project, None);

    let outcome = project
        .ingest(None, Some(&file), &IngestOptions::default())
        .unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Completed {
            rows: 3,
            resumed: false
        }
    );

    // test mode keeps every score, so all other cards appear
    let QueryOutcome::Ranked(entries) = project.similar("Acme", None, true).unwrap() else {
        panic!("expected a ranked result");
    };
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].key, "zenith");
    assert_eq!(entries[0].rank, 1);
    assert!(entries[0].score > entries[1].score);
    assert_eq!(entries[1].key, "orbit");
}

#[test]
fn word_attribute_filters_and_materializes_the_expected_rows() {
    let dir = TempDir::new().unwrap();
    let file = write_csv(
        &dir,
        "cards.csv",
        "name;word\nA;apple fruit\nB;apple banana\nC;car engine\n",
    );
    let project = Project::open(dir.path(), "Fruits", None).unwrap();
    loosen_filter(&project, None);
    project
        .ingest(None, Some(&file), &IngestOptions::default())
        .unwrap();

    // inspect the corpus database directly: "car" is below min_len, so
    // the filtered corpus holds 2 + 2 + 1 rows
    let corpus = project.corpus(None).unwrap();
    assert_eq!(corpus.vocabulary_size().unwrap(), 4);
    let conn = cardsim::db::open(corpus.path()).unwrap();
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM filtered_corpus", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 5);
    let apple_df: i64 = conn
        .query_row(
            "SELECT doc_freq FROM vocabulary WHERE token = 'word_apple'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(apple_df, 2);
    let car: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM vocabulary WHERE token LIKE '%car%'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(car, 0);

    // B shares "apple" with A, C shares nothing
    let QueryOutcome::Ranked(entries) = project.similar("A", None, true).unwrap() else {
        panic!("expected a ranked result");
    };
    assert_eq!(entries[0].key, "b");
    assert!(entries[0].score > 0.0);
}

#[test]
fn card_identities_normalize_across_casing_and_accents() {
    let dir = TempDir::new().unwrap();
    let file = write_csv(
        &dir,
        "cards.csv",
        "name;city\nSão Bento;lisboa\nSAO  BENTO;porto\n",
    );
    let project = Project::open(dir.path(), "Places", None).unwrap();
    loosen_filter(&project, None);
    project
        .ingest(None, Some(&file), &IngestOptions::default())
        .unwrap();

    let corpus = project.corpus(None).unwrap();
    assert_eq!(corpus.cards().unwrap(), vec!["sao_bento"]);
}

#[test]
fn querying_before_any_ingest_reports_unavailable() {
    let dir = TempDir::new().unwrap();
    let project = Project::open(dir.path(), "Empty", None).unwrap();
    match project.similar("anything", None, false).unwrap() {
        QueryOutcome::Unavailable(reason) => assert!(reason.contains("anything")),
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[test]
fn resuming_without_a_pending_run_is_refused() {
    let dir = TempDir::new().unwrap();
    let project = Project::open(dir.path(), "Empty", None).unwrap();
    let outcome = project.ingest(None, None, &IngestOptions::default()).unwrap();
    assert!(matches!(outcome, IngestOutcome::Refused(_)));
}

#[test]
fn row_cap_limits_the_ingested_rows() {
    let dir = TempDir::new().unwrap();
    let file = write_csv(
        &dir,
        "cards.csv",
        "name;city\nA;x\nB;y\nC;z\n",
    );
    let project = Project::open(dir.path(), "Capped", None).unwrap();
    loosen_filter(&project, None);
    let opts = IngestOptions {
        row_cap: Some(2),
        ..Default::default()
    };
    let outcome = project.ingest(None, Some(&file), &opts).unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Completed {
            rows: 2,
            resumed: false
        }
    );
    assert_eq!(project.corpus(None).unwrap().cards().unwrap(), vec!["a", "b"]);
}

// ============================================================
// Dimensioned projects
// ============================================================

#[test]
fn relationship_tokens_divert_into_the_shared_dimension() {
    let dir = TempDir::new().unwrap();
    let file = write_csv(
        &dir,
        "finance.csv",
        "name;bank;owner_cpf\n\
         Acme;alfa;11122233344\n\
         Zenith;beta;11122233344\n\
         Orbit;beta;99988877766\n",
    );
    let mut project = Project::open(dir.path(), "Companies", Some(true)).unwrap();
    project.add_dimension("Finance").unwrap();
    loosen_filter(&project, Some("Finance"));
    loosen_filter(&project, Some(RELATIONSHIPS_DIMENSION));

    project
        .ingest(Some("Finance"), Some(&file), &IngestOptions::default())
        .unwrap();

    // the relationships dimension received one doc per row that carried a
    // tagged token, vectorized under the tag name
    let relationships = project.corpus(Some(RELATIONSHIPS_DIMENSION)).unwrap();
    assert_eq!(
        relationships.cards().unwrap(),
        vec!["acme", "zenith", "orbit"]
    );
    assert!(relationships.vocabulary_size().unwrap() > 0);
    let conn = cardsim::db::open(relationships.path()).unwrap();
    let shared: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT card_id) FROM filtered_corpus
             WHERE token = 'cpf_11122233344'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(shared, 2);

    // acme and zenith share an owner, orbit does not
    let QueryOutcome::Ranked(entries) = project
        .similar("Acme", Some(&[RELATIONSHIPS_DIMENSION.to_string()]), true)
        .unwrap()
    else {
        panic!("expected a ranked result");
    };
    assert_eq!(entries[0].key, "zenith");
    assert!(entries[0].score > entries[1].score);
}

#[test]
fn dimension_fusion_weights_the_combined_scores() {
    let dir = TempDir::new().unwrap();
    let finance = write_csv(
        &dir,
        "finance.csv",
        "name;bank\nAcme;alfa\nZenith;alfa\nOrbit;beta\n",
    );
    let places = write_csv(
        &dir,
        "places.csv",
        "name;city\nAcme;porto\nZenith;lisboa\nOrbit;porto\n",
    );
    let mut project = Project::open(dir.path(), "Companies", Some(true)).unwrap();
    project.add_dimension("Finance").unwrap();
    project.add_dimension("Places").unwrap();
    loosen_filter(&project, Some("Finance"));
    loosen_filter(&project, Some("Places"));

    project
        .ingest(Some("Finance"), Some(&finance), &IngestOptions::default())
        .unwrap();
    project
        .ingest(Some("Places"), Some(&places), &IngestOptions::default())
        .unwrap();

    // finance says zenith, places says orbit; tilt the weights and the
    // consensus follows
    project.set_dimension_weight("Finance", 10.0).unwrap();
    let QueryOutcome::Ranked(entries) = project
        .similar(
            "Acme",
            Some(&["Finance".to_string(), "Places".to_string()]),
            true,
        )
        .unwrap()
    else {
        panic!("expected a ranked result");
    };
    assert_eq!(entries[0].key, "zenith");

    project.set_dimension_weight("Finance", 0.1).unwrap();
    let QueryOutcome::Ranked(entries) = project
        .similar(
            "Acme",
            Some(&["Finance".to_string(), "Places".to_string()]),
            true,
        )
        .unwrap()
    else {
        panic!("expected a ranked result");
    };
    assert_eq!(entries[0].key, "orbit");
}

#[test]
fn max_results_truncates_outside_test_mode() {
    let dir = TempDir::new().unwrap();
    let file = write_csv(
        &dir,
        "cards.csv",
        "name;city\nA;x\nB;x\nC;x\nD;x\n",
    );
    let mut project = Project::open(dir.path(), "Trunc", None).unwrap();
    loosen_filter(&project, None);
    project
        .ingest(None, Some(&file), &IngestOptions::default())
        .unwrap();
    project.set_max_results(1).unwrap();

    // every card shares the single token, so nothing clears the score
    // threshold outside test mode and the cap bounds whatever remains
    if let QueryOutcome::Ranked(entries) = project.similar("A", None, false).unwrap() {
        assert!(entries.len() <= 1);
    } else {
        panic!("expected a ranked result");
    }
    let QueryOutcome::Ranked(all) = project.similar("A", None, true).unwrap() else {
        panic!("expected a ranked result");
    };
    assert_eq!(all.len(), 3);
}
