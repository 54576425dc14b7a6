mod support;

use coral_core::bulk::EntityKind;
use coral_core::database::LibraryRepository;
use coral_core::database::schema::{
    ALBUM_ARTISTS, ALBUMS, ARTISTS, AUDIO_FILES, GENRES, TRACK_ARTISTS, TRACK_KEYWORDS, TRACKS,
};
use coral_core::scan::{DecodedTrack, FileRename, IndexOperation};
use coral_model::{Album, AlbumType, Artwork, Track};

use support::{Fixture, tags};

fn operations(events: &[coral_core::scan::IndexEvent]) -> Vec<IndexOperation> {
    events.iter().map(|event| event.operation).collect()
}

fn seed_album(fixture: &Fixture) {
    fixture.add_file("Burial/Untrue/01.flac", tags("Archangel", "Burial", "Untrue"));
    fixture.add_file("Burial/Untrue/02.flac", tags("Near Dark", "Burial", "Untrue"));
    fixture.add_file("Burial/Untrue/03.flac", tags("Ghost Hardware", "Burial", "Untrue"));
}

#[tokio::test]
async fn directory_of_one_album_creates_shared_entities() {
    let fixture = Fixture::new().await;
    seed_album(&fixture);

    let events = fixture.index(None).await;
    assert_eq!(operations(&events), vec![IndexOperation::Create; 3]);

    let store = &fixture.store;
    assert_eq!(store.count(EntityKind::Track).await, 3);
    assert_eq!(store.count(EntityKind::AudioFile).await, 3);
    assert_eq!(store.count(EntityKind::Album).await, 1);
    assert_eq!(store.count(EntityKind::Artist).await, 1);
    assert_eq!(store.count(EntityKind::ArtistWithRole).await, 1);
    assert_eq!(store.count(EntityKind::AudioMetadata).await, 1);
    assert_eq!(store.link_rows(&TRACK_ARTISTS).await.len(), 3);
    assert_eq!(store.link_rows(&ALBUM_ARTISTS).await.len(), 1);
    assert!(!store.link_rows(&TRACK_KEYWORDS).await.is_empty());

    let albums: Vec<Album> = store.entities().await.expect("albums decode");
    assert_eq!(albums[0].name, "Untrue");
    assert_eq!(albums[0].album_type, Some(AlbumType::EP));

    let library = store
        .get_library(fixture.library.id)
        .await
        .expect("library lookup")
        .expect("library exists");
    assert!(library.last_scan.is_some());
}

#[tokio::test]
async fn album_entities_are_written_before_their_tracks() {
    let fixture = Fixture::new().await;
    for (file, title) in [
        ("01.flac", "Archangel"),
        ("02.flac", "Near Dark"),
        ("03.flac", "Ghost Hardware"),
    ] {
        let decoded = DecodedTrack {
            genre: Some("Dubstep".to_string()),
            ..tags(title, "Burial", "Untrue")
        };
        fixture.add_file(&format!("Burial/Untrue/{file}"), decoded);
    }

    fixture.index(None).await;

    let log = fixture.store.insert_log().await;
    let position = |table: &str| {
        log.iter()
            .position(|record| record.table == table)
            .unwrap_or_else(|| panic!("nothing inserted into {table}"))
    };
    let tracks = position(TRACKS.table);
    assert_eq!(log[tracks].rows, 3);
    for table in [ARTISTS.table, GENRES.table, ALBUMS.table, AUDIO_FILES.table] {
        assert!(position(table) < tracks, "{table} inserted after tracks");
    }
    assert!(position(TRACK_ARTISTS.table) > tracks);
    assert_eq!(fixture.store.link_rows(&TRACK_ARTISTS).await.len(), 3);
}

#[tokio::test]
async fn four_main_artists_make_a_compilation() {
    let fixture = Fixture::new().await;
    let artists = [
        ("a.flac", "Actress"),
        ("b.flac", "Kode9"),
        ("c.flac", "Loefah"),
        ("d.flac", "Mala"),
    ];
    for (file, artist) in artists {
        fixture.add_file(&format!("Various/{file}"), tags(artist, artist, "Hyperdub Mix"));
    }

    fixture.index(None).await;

    let albums: Vec<Album> = fixture.store.entities().await.expect("albums decode");
    assert_eq!(albums.len(), 1);
    assert_eq!(albums[0].album_type, Some(AlbumType::Compilation));
    assert_eq!(fixture.store.count(EntityKind::Artist).await, 4);
    assert_eq!(fixture.store.link_rows(&ALBUM_ARTISTS).await.len(), 4);
}

#[tokio::test]
async fn mixed_folder_indexes_each_file_on_its_own() {
    let fixture = Fixture::new().await;
    fixture.add_file("Loose/one.flac", tags("One", "Burial", "First"));
    fixture.add_file("Loose/two.flac", tags("Two", "Burial", "Second"));

    fixture.index(None).await;

    let mut albums: Vec<Album> = fixture.store.entities().await.expect("albums decode");
    albums.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(albums.len(), 2);
    assert!(
        albums
            .iter()
            .all(|album| album.album_type == Some(AlbumType::Single))
    );
    assert_eq!(fixture.store.count(EntityKind::Artist).await, 1);
}

#[tokio::test]
async fn unchanged_library_is_not_reindexed() {
    let fixture = Fixture::new().await;
    seed_album(&fixture);
    fixture.index(None).await;

    fixture.store.clear_insert_log().await;
    let events = fixture.index(None).await;

    assert!(events.is_empty());
    assert!(fixture.store.insert_log().await.is_empty());
    assert_eq!(fixture.store.count(EntityKind::Track).await, 3);
}

#[tokio::test]
async fn modified_file_updates_its_track() {
    let fixture = Fixture::new().await;
    seed_album(&fixture);
    fixture.index(None).await;

    fixture.add_file("Burial/Untrue/02.flac", tags("Near Dark (Live)", "Burial", "Untrue"));
    fixture.touch("Burial/Untrue/02.flac");

    let events = fixture.index(None).await;
    assert_eq!(operations(&events), vec![IndexOperation::Update]);

    let tracks: Vec<Track> = fixture.store.entities().await.expect("tracks decode");
    assert_eq!(tracks.len(), 3);
    assert!(tracks.iter().any(|track| track.title == "Near Dark (Live)"));
    assert_eq!(fixture.store.count(EntityKind::Album).await, 1);
}

#[tokio::test]
async fn renamed_file_keeps_its_track() {
    let fixture = Fixture::new().await;
    seed_album(&fixture);
    fixture.index(None).await;

    let before: Vec<Track> = fixture.store.entities().await.expect("tracks decode");
    let old_path = fixture.path("Burial/Untrue/01.flac");
    let new_path = fixture.path("Burial/Untrue/01 - Archangel.flac");
    std::fs::rename(&old_path, &new_path).expect("rename file");

    let events = fixture
        .indexer
        .handle_renames(
            &fixture.library,
            &[
                FileRename::new(&old_path, &new_path),
                FileRename::new(fixture.path("missing.flac"), fixture.path("other.flac")),
            ],
        )
        .await
        .expect("renames apply");

    assert_eq!(operations(&events), vec![IndexOperation::Update]);
    let renamed = events[0].track.as_ref().expect("renamed track");
    assert!(before.iter().any(|track| track.id == renamed.id));

    let known = fixture
        .store
        .known_files(fixture.library.id)
        .await
        .expect("known files");
    assert!(
        known
            .iter()
            .any(|file| file.path == new_path.to_string_lossy())
    );
    assert!(
        !known
            .iter()
            .any(|file| file.path == old_path.to_string_lossy())
    );
    assert_eq!(fixture.store.count(EntityKind::Track).await, 3);
}

#[tokio::test]
async fn removed_files_are_deleted_with_their_orphans() {
    let fixture = Fixture::new().await;
    seed_album(&fixture);
    std::fs::write(fixture.path("Burial/Untrue/cover.jpg"), b"jpeg").expect("write cover");
    fixture.add_file("Other/Single/01.flac", tags("Lonely", "Kode9", "Single"));
    fixture.index(None).await;

    let artworks: Vec<Artwork> = fixture.store.entities().await.expect("artworks decode");
    assert_eq!(artworks.len(), 1);
    let artwork_file = std::path::PathBuf::from(&artworks[0].path);
    assert!(artwork_file.exists());

    std::fs::remove_file(fixture.path("Burial/Untrue/03.flac")).expect("remove file");
    let events = fixture.index(None).await;
    assert_eq!(operations(&events), vec![IndexOperation::Delete]);
    assert_eq!(fixture.store.count(EntityKind::Track).await, 3);
    assert_eq!(fixture.store.count(EntityKind::Album).await, 2);

    std::fs::remove_dir_all(fixture.path("Burial")).expect("remove album");
    let events = fixture.index(None).await;
    assert_eq!(operations(&events), vec![IndexOperation::Delete; 2]);

    let store = &fixture.store;
    assert_eq!(store.count(EntityKind::Track).await, 1);
    assert_eq!(store.count(EntityKind::Album).await, 1);
    assert_eq!(store.count(EntityKind::Artist).await, 1);
    assert_eq!(store.count(EntityKind::ArtistWithRole).await, 1);
    assert_eq!(store.count(EntityKind::Artwork).await, 0);
    assert_eq!(store.link_rows(&ALBUM_ARTISTS).await.len(), 1);
    assert!(!artwork_file.exists());
}

#[tokio::test]
async fn scoped_scan_only_deletes_inside_its_directory() {
    let fixture = Fixture::new().await;
    seed_album(&fixture);
    fixture.add_file("Other/Single/01.flac", tags("Lonely", "Kode9", "Single"));
    fixture.index(None).await;

    std::fs::remove_file(fixture.path("Burial/Untrue/01.flac")).expect("remove file");
    std::fs::remove_file(fixture.path("Other/Single/01.flac")).expect("remove file");

    let events = fixture.index(Some(fixture.path("Other"))).await;
    assert_eq!(operations(&events), vec![IndexOperation::Delete]);
    assert_eq!(fixture.store.count(EntityKind::Track).await, 3);
}
