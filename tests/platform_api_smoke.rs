use rfvast::platform::{
    AdResponseFetcher, DeviceProfile, MediaState, Player, SimulatedPlayer, StaticFetcher,
};
use rfvast::response::{AdResponse, AdSource, MediaFile};
use rfvast::{EventBus, EventKind, Settings, VastOptions};
use std::sync::{Arc, Mutex};

#[test]
fn simulated_player_smoke() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Playing, EventKind::Paused, EventKind::Ended] {
        let s = Arc::clone(&seen);
        bus.on(kind, move |e| s.lock().unwrap().push(e.kind));
    }
    let p = SimulatedPlayer::new(bus, "content.mp4", 3.0).with_device(DeviceProfile::ipad());
    assert!(p.device().is_idevice());

    // playback
    p.play();
    p.tick(1.0);
    p.pause();
    p.tick(1.0);
    assert_eq!(p.current_time(), 1.0);
    p.play();
    p.finish();
    assert_eq!(p.state(), MediaState::Ended);

    // presentation hooks
    p.set_style(Some("width: 640px"));
    p.set_ad_loading(true);
    p.set_ads_label(true);
    assert_eq!(p.style().as_deref(), Some("width: 640px"));
    assert!(p.is_loading() && p.ads_label_visible());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            EventKind::Playing,
            EventKind::Paused,
            EventKind::Playing,
            EventKind::Ended
        ]
    );
}

#[tokio::test]
async fn static_fetcher_smoke() -> anyhow::Result<()> {
    let ad = AdResponse::with_media(vec![MediaFile::new("ad.mp4")]);
    let fetcher = StaticFetcher::new().with_response("http://ad", ad.clone());

    let got = fetcher
        .get_response(&AdSource::Url("http://ad".into()))
        .await
        .map_err(anyhow::Error::msg)?;
    assert_eq!(got, ad);

    let doc = serde_json::to_string(&ad)?;
    let inline = fetcher
        .get_response(&AdSource::Document(doc))
        .await
        .map_err(anyhow::Error::msg)?;
    assert_eq!(inline, ad);
    Ok(())
}

#[test]
fn options_smoke() -> anyhow::Result<()> {
    let options = VastOptions::from_json(
        r#"{
            "adTagUrl": ["http://primary", "http://backup"],
            "adCancelTimeout": 1500,
            "midrolls": [15, 45],
            "postroll": true,
            "verbosity": 3
        }"#,
    )?;
    let settings = Settings::from_options(options)?;
    assert_eq!(settings.ad_cancel_timeout.as_millis(), 1500);
    assert_eq!(settings.timeout.as_millis(), 500);
    assert_eq!(settings.planned_ads(), 4);
    assert_eq!(settings.verbosity.level_filter(), log::LevelFilter::Debug);
    Ok(())
}
