//! SQL schema for the provenance index.
//!
//! Foreign keys are declared at the database layer as the second line of
//! defense; the application still validates every reference up front via
//! `require_foreign_key` so users see a named error rather than a raw
//! constraint failure.
//!
//! `evaluation.evaluator_id` is deliberately *not* a declared foreign key:
//! replacing a challenge problem's evaluator deletes the old evaluator row
//! while historical evaluations made with it are kept for the audit trail.

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS team (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    institution     TEXT NOT NULL,
    description     TEXT NOT NULL,
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS engine (
    id              TEXT PRIMARY KEY,
    full_path       TEXT NOT NULL,
    team_id         INTEGER NOT NULL REFERENCES team(id),
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS challenge_problem (
    id              INTEGER NOT NULL,
    revision_major  INTEGER NOT NULL,
    revision_minor  INTEGER NOT NULL,
    url             TEXT,
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL,
    PRIMARY KEY (id, revision_major, revision_minor)
);

CREATE TABLE IF NOT EXISTS dataset (
    in_digest       TEXT PRIMARY KEY,
    eval_digest     TEXT NOT NULL,
    label           TEXT,
    rel_inpath      TEXT NOT NULL,
    rel_evalpath    TEXT NOT NULL,
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS challenge_problem_dataset (
    cp_id           INTEGER NOT NULL,
    cp_major        INTEGER NOT NULL,
    cp_minor        INTEGER NOT NULL,
    dataset_id      TEXT NOT NULL REFERENCES dataset(in_digest),
    PRIMARY KEY (cp_id, cp_major, cp_minor, dataset_id),
    FOREIGN KEY (cp_id, cp_major, cp_minor)
        REFERENCES challenge_problem(id, revision_major, revision_minor)
);

CREATE TABLE IF NOT EXISTS solution (
    id              TEXT PRIMARY KEY,
    engine_id       TEXT NOT NULL REFERENCES engine(id),
    description     TEXT,
    cp_id           INTEGER NOT NULL,
    cp_major        INTEGER NOT NULL,
    cp_minor        INTEGER NOT NULL,
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL,
    FOREIGN KEY (cp_id, cp_major, cp_minor)
        REFERENCES challenge_problem(id, revision_major, revision_minor)
);

CREATE TABLE IF NOT EXISTS configured_solution (
    id              TEXT NOT NULL,
    filename        TEXT NOT NULL,
    solution_id     TEXT NOT NULL REFERENCES solution(id),
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL,
    PRIMARY KEY (id, solution_id)
);

CREATE TABLE IF NOT EXISTS evaluator (
    id              TEXT PRIMARY KEY,
    cp_id           INTEGER NOT NULL,
    cp_major        INTEGER NOT NULL,
    cp_minor        INTEGER NOT NULL,
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL,
    UNIQUE (cp_id, cp_major, cp_minor),
    FOREIGN KEY (cp_id, cp_major, cp_minor)
        REFERENCES challenge_problem(id, revision_major, revision_minor)
);

CREATE TABLE IF NOT EXISTS run (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    engine_id       TEXT NOT NULL REFERENCES engine(id),
    config_id       TEXT NOT NULL,
    solution_id     TEXT NOT NULL,
    dataset_id      TEXT NOT NULL REFERENCES dataset(in_digest),
    output          TEXT NOT NULL,
    log             TEXT,
    started         TEXT NOT NULL,
    duration        REAL NOT NULL,
    load_average    REAL NOT NULL,
    load_max        REAL NOT NULL,
    ram_average     REAL NOT NULL,
    ram_max         REAL NOT NULL,
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL,
    FOREIGN KEY (config_id, solution_id)
        REFERENCES configured_solution(id, solution_id)
);

CREATE TABLE IF NOT EXISTS evaluation (
    id              TEXT NOT NULL,
    evaluator_id    TEXT NOT NULL,
    run_id          INTEGER NOT NULL REFERENCES run(id),
    did_succeed     INTEGER NOT NULL,
    meta_created    TEXT NOT NULL,
    meta_updated    TEXT NOT NULL,
    PRIMARY KEY (id, evaluator_id, run_id),
    UNIQUE (run_id)
);
"#;
