use sqlx::PgPool;

/// Create every table the application needs if it is missing.
/// Idempotent, run on every startup. Existing tables are left untouched, so a
/// database carrying older `incidents`/`sanctions` shapes keeps them; see
/// [`crate::db::layout`].
pub async fn provision_schema(pool: &PgPool) -> anyhow::Result<()> {
    // --- School years ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS annees_scolaires (
            id          BIGSERIAL PRIMARY KEY,
            libelle     VARCHAR(32) NOT NULL UNIQUE,
            date_debut  DATE NOT NULL,
            date_fin    DATE NOT NULL,
            active      BOOLEAN NOT NULL DEFAULT FALSE,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CHECK (date_fin > date_debut)
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Users ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS utilisateurs (
            id             BIGSERIAL PRIMARY KEY,
            email          VARCHAR(255) NOT NULL UNIQUE,
            password_hash  TEXT NOT NULL,
            nom            VARCHAR(128) NOT NULL,
            prenom         VARCHAR(128) NOT NULL,
            role           VARCHAR(32) NOT NULL DEFAULT 'enseignant'
                           CHECK (role IN ('admin','directeur','enseignant','comptable','secretaire','surveillant')),
            actif          BOOLEAN NOT NULL DEFAULT TRUE,
            created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Staff ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS personnel (
            id              BIGSERIAL PRIMARY KEY,
            nom             VARCHAR(128) NOT NULL,
            prenom          VARCHAR(128) NOT NULL,
            fonction        VARCHAR(128) NOT NULL DEFAULT 'enseignant',
            email           VARCHAR(255),
            telephone       VARCHAR(32),
            utilisateur_id  BIGINT REFERENCES utilisateurs(id) ON DELETE SET NULL,
            actif           BOOLEAN NOT NULL DEFAULT TRUE
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Classes ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS classes (
            id                 BIGSERIAL PRIMARY KEY,
            nom                VARCHAR(100) NOT NULL,
            niveau             VARCHAR(16) NOT NULL
                               CHECK (niveau IN ('maternelle','primaire','secondaire','superieur')),
            section            VARCHAR(64),
            salle              VARCHAR(64),
            capacite_max       INTEGER NOT NULL DEFAULT 40,
            titulaire_id       BIGINT REFERENCES personnel(id) ON DELETE SET NULL,
            annee_scolaire_id  BIGINT NOT NULL REFERENCES annees_scolaires(id),
            created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (nom, annee_scolaire_id)
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Students ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS eleves (
            id                BIGSERIAL PRIMARY KEY,
            numero_matricule  VARCHAR(32) NOT NULL UNIQUE,
            nom               VARCHAR(128) NOT NULL,
            prenom            VARCHAR(128) NOT NULL,
            date_naissance    DATE NOT NULL,
            sexe              CHAR(1) NOT NULL CHECK (sexe IN ('M','F')),
            status            VARCHAR(16) NOT NULL DEFAULT 'actif'
                              CHECK (status IN ('actif','inactif')),
            created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Enrollments ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS inscriptions (
            id                 BIGSERIAL PRIMARY KEY,
            eleve_id           BIGINT NOT NULL REFERENCES eleves(id) ON DELETE CASCADE,
            classe_id          BIGINT NOT NULL REFERENCES classes(id),
            annee_scolaire_id  BIGINT NOT NULL REFERENCES annees_scolaires(id),
            date_inscription   DATE NOT NULL DEFAULT CURRENT_DATE,
            status             VARCHAR(16) NOT NULL DEFAULT 'inscrit'
                               CHECK (status IN ('inscrit','transfere','abandonne')),
            UNIQUE (eleve_id, annee_scolaire_id)
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Messages ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS messages (
            id                 BIGSERIAL PRIMARY KEY,
            expediteur_id      BIGINT NOT NULL REFERENCES utilisateurs(id),
            destinataire_type  VARCHAR(16) NOT NULL
                               CHECK (destinataire_type IN ('individuel','classe','tous','personnalise')),
            destinataire_id    BIGINT,
            sujet              VARCHAR(200) NOT NULL,
            contenu            TEXT NOT NULL,
            type_message       VARCHAR(16) NOT NULL DEFAULT 'information'
                               CHECK (type_message IN ('information','convocation','rappel','urgence')),
            priorite           VARCHAR(16) NOT NULL DEFAULT 'normale'
                               CHECK (priorite IN ('basse','normale','haute')),
            status             VARCHAR(16) NOT NULL DEFAULT 'brouillon'
                               CHECK (status IN ('brouillon','programme','envoye','lu','archive')),
            programme          BOOLEAN NOT NULL DEFAULT FALSE,
            date_programmee    TIMESTAMPTZ,
            date_envoi         TIMESTAMPTZ,
            date_lecture       TIMESTAMPTZ,
            created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS message_destinataires (
            message_id      BIGINT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            utilisateur_id  BIGINT NOT NULL REFERENCES utilisateurs(id) ON DELETE CASCADE,
            PRIMARY KEY (message_id, utilisateur_id)
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Incidents (current shape, with reporter) ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS incidents (
            id             BIGSERIAL PRIMARY KEY,
            eleve_id       BIGINT NOT NULL REFERENCES eleves(id) ON DELETE CASCADE,
            classe_id      BIGINT REFERENCES classes(id) ON DELETE SET NULL,
            date_incident  DATE NOT NULL,
            lieu           VARCHAR(128),
            description    TEXT NOT NULL,
            temoins        TEXT,
            gravite        VARCHAR(16) NOT NULL DEFAULT 'legere'
                           CHECK (gravite IN ('legere','moyenne','grave','tres_grave')),
            status         VARCHAR(16) NOT NULL DEFAULT 'nouveau'
                           CHECK (status IN ('nouveau','en_cours','resolu','archive')),
            rapporte_par   BIGINT REFERENCES personnel(id) ON DELETE SET NULL,
            created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Sanction types ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS types_sanctions (
            id                  BIGSERIAL PRIMARY KEY,
            nom                 VARCHAR(100) NOT NULL UNIQUE,
            description         TEXT,
            duree_defaut_jours  INTEGER
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::raw_sql(
        r#"INSERT INTO types_sanctions (nom, description, duree_defaut_jours) VALUES
             ('Avertissement', 'Avertissement écrit', NULL),
             ('Retenue', 'Retenue après les cours', 1),
             ('Exclusion temporaire', 'Exclusion de l''établissement', 3),
             ('Travail d''intérêt général', 'Travail au sein de l''établissement', 2)
           ON CONFLICT (nom) DO NOTHING"#,
    )
    .execute(pool)
    .await?;

    // --- Sanctions (current shape, typed) ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS sanctions (
            id                BIGSERIAL PRIMARY KEY,
            eleve_id          BIGINT NOT NULL REFERENCES eleves(id) ON DELETE CASCADE,
            incident_id       BIGINT REFERENCES incidents(id) ON DELETE SET NULL,
            type_sanction_id  BIGINT NOT NULL REFERENCES types_sanctions(id),
            date_sanction     DATE NOT NULL DEFAULT CURRENT_DATE,
            date_debut        DATE NOT NULL,
            date_fin          DATE NOT NULL,
            duree_jours       INTEGER NOT NULL DEFAULT 1,
            motif             TEXT,
            status            VARCHAR(16) NOT NULL DEFAULT 'active'
                              CHECK (status IN ('active','terminee','suspendue','annulee')),
            created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CHECK (date_fin >= date_debut)
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Fees and payments ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS frais_scolaires (
            id                 BIGSERIAL PRIMARY KEY,
            libelle            VARCHAR(128) NOT NULL,
            type_frais         VARCHAR(16) NOT NULL
                               CHECK (type_frais IN ('inscription','scolarite','cantine','transport','autre')),
            montant            BIGINT NOT NULL CHECK (montant >= 0),
            annee_scolaire_id  BIGINT NOT NULL REFERENCES annees_scolaires(id),
            niveau             VARCHAR(16),
            classe_id          BIGINT REFERENCES classes(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS paiements (
            id                 BIGSERIAL PRIMARY KEY,
            eleve_id           BIGINT NOT NULL REFERENCES eleves(id) ON DELETE CASCADE,
            type_frais         VARCHAR(16) NOT NULL
                               CHECK (type_frais IN ('inscription','scolarite','cantine','transport','autre')),
            montant            BIGINT NOT NULL CHECK (montant > 0),
            date_paiement      DATE NOT NULL DEFAULT CURRENT_DATE,
            mode_paiement      VARCHAR(16) NOT NULL DEFAULT 'especes'
                               CHECK (mode_paiement IN ('especes','cheque','virement','mobile')),
            reference          VARCHAR(64),
            annee_scolaire_id  BIGINT NOT NULL REFERENCES annees_scolaires(id),
            created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Admissions ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS demandes_admission (
            id                  BIGSERIAL PRIMARY KEY,
            numero_demande      VARCHAR(32) NOT NULL UNIQUE,
            nom_eleve           VARCHAR(128) NOT NULL,
            prenom_eleve        VARCHAR(128) NOT NULL,
            date_naissance      DATE NOT NULL,
            sexe                CHAR(1) NOT NULL CHECK (sexe IN ('M','F')),
            classe_demandee_id  BIGINT NOT NULL REFERENCES classes(id),
            nom_parent          VARCHAR(255) NOT NULL,
            telephone_parent    VARCHAR(32),
            email_parent        VARCHAR(255),
            status              VARCHAR(16) NOT NULL DEFAULT 'en_attente'
                                CHECK (status IN ('en_attente','acceptee','refusee','inscrit')),
            priorite            VARCHAR(16) NOT NULL DEFAULT 'normale'
                                CHECK (priorite IN ('normale','haute','urgente')),
            commentaire         TEXT,
            eleve_id            BIGINT REFERENCES eleves(id) ON DELETE SET NULL,
            created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(pool)
    .await?;

    // --- Audit log ---
    sqlx::raw_sql(
        r#"CREATE TABLE IF NOT EXISTS journal_actions (
            id              BIGSERIAL PRIMARY KEY,
            utilisateur_id  BIGINT,
            action          VARCHAR(64) NOT NULL,
            ressource_type  VARCHAR(64),
            ressource_id    BIGINT,
            details         TEXT,
            adresse_ip      VARCHAR(64),
            created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::raw_sql(
        r#"CREATE INDEX IF NOT EXISTS idx_inscriptions_classe ON inscriptions (classe_id, annee_scolaire_id);
           CREATE INDEX IF NOT EXISTS idx_messages_destinataire ON messages (destinataire_type, destinataire_id);
           CREATE INDEX IF NOT EXISTS idx_incidents_eleve ON incidents (eleve_id);
           CREATE INDEX IF NOT EXISTS idx_sanctions_eleve ON sanctions (eleve_id);
           CREATE INDEX IF NOT EXISTS idx_paiements_eleve ON paiements (eleve_id, annee_scolaire_id);
           CREATE INDEX IF NOT EXISTS idx_journal_created ON journal_actions (created_at DESC)"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
